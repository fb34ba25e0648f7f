//! Prompt templates for drafting, call-trace explanation and fact-checking.
//!
//! Domain logic for rendering prompts. Provider-agnostic.

use crate::gateway::Message;

// =============================================================================
// Prompt templates
// =============================================================================

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }

    /// Stable fingerprint of the rendered prompt, recorded in reports.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.template_slug.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.system.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.user.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
pub fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// A prompt template with `{name}` placeholders in the user message.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Substitute each `{name}` with its value. Values are escaped: contract
    /// names, labels and token symbols come from third parties.
    pub fn render(&self, vars: &[(&str, &str)]) -> PromptInstance {
        let mut user = self.user.to_string();
        for (name, value) in vars {
            user = user.replace(&format!("{{{name}}}"), escape_xml_chars(value.trim()).as_str());
        }
        PromptInstance {
            template_slug: self.slug.to_string(),
            system: self.system.trim().to_string(),
            user: user.trim().to_string(),
        }
    }

    /// BLAKE3 of the raw template text, for tracking template revisions.
    pub fn template_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.system.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.user.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

// =============================================================================
// Templates
// =============================================================================

pub const DRAFT_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "draft_v1",
    system: r#"
You explain blockchain transactions to a non-specialist reader.

Use only the facts you are given. Do not guess token prices, intentions or
identities that the facts do not state. Amounts must be copied exactly as given.

Reply in this format:
SUMMARY: <one or two sentences saying what the transaction did>
1. <first step>
2. <second step>
...
"#,
    user: r#"
<transaction>
{transaction}
</transaction>

<decoded_call>
{decoded_call}
</decoded_call>

<token_flows>
{token_flows}
</token_flows>

<call_trace_explanation>
{call_trace}
</call_trace_explanation>

<pattern>{pattern}</pattern>

<gas>
{gas}
</gas>

Explain what this transaction did.
"#,
};

pub const EXPLAIN_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "calltrace_explain_v1",
    system: r#"
You read EVM call traces. Given the ordered list of internal calls and what is
known about each address, explain in a short paragraph how control flowed
between contracts and what each significant call accomplished. Mention failed
calls. Do not invent contract names that are not given.
"#,
    user: r#"
<calls>
{calls}
</calls>

<addresses>
{addresses}
</addresses>

Explain this call sequence.
"#,
};

pub const VERIFY_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "verify_v1",
    system: r#"
You fact-check transaction explanations against ground truth.

Compare the draft with the ground-truth facts. List every statement in the draft
that contradicts the facts (wrong amounts, wrong addresses, wrong direction of a
transfer, wrong status) as a bullet line starting with "- ". Omissions are not
errors. If there are no contradictions, reply with exactly: OK
"#,
    user: r#"
<ground_truth>
{ground_truth}
</ground_truth>

<call_trace_explanation>
{call_trace}
</call_trace_explanation>

<draft>
{draft}
</draft>
"#,
};

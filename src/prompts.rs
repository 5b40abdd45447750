//! Instruction prompts sent alongside the page image.
//!
//! The schema itself travels in the request's `response_format`, so the prompt
//! only needs to tell the model what kind of document it is looking at. Each
//! built-in schema has a tailored prompt; custom schemas get the generic one.
//!
//! Callers can always pass their own prompt to
//! [`crate::ParserService::parse_document`]; the constants here are used only
//! when no override is provided.

/// Generic extraction prompt used for custom schemas.
pub const DEFAULT_PROMPT: &str = "You are an AI document extraction specialist. \
You have been asked to extract structured information from this image";

pub const RESUME_PROMPT: &str = "You are an AI document extraction specialist. \
Extract all resume information from this image including personal details, education, \
work experience, skills, and other relevant sections.";

pub const INVOICE_PROMPT: &str = "You are an AI document extraction specialist. \
Extract all invoice information from this image including invoice number, date, vendor, \
line items, amounts, and totals.";

pub const RECEIPT_PROMPT: &str = "You are an AI document extraction specialist. \
Extract all receipt information from this image including merchant, date, items purchased, \
prices, and total amount.";

pub const ID_CARD_PROMPT: &str = "You are an AI document extraction specialist. \
Extract all information from this ID card including name, ID number, date of birth, \
and other visible fields.";

/// The prompt used for `schema_name` when the caller gives none.
pub fn default_prompt_for(schema_name: &str) -> &'static str {
    match schema_name {
        "resume" => RESUME_PROMPT,
        "invoice" => INVOICE_PROMPT,
        "receipt" => RECEIPT_PROMPT,
        "id_card" => ID_CARD_PROMPT,
        _ => DEFAULT_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schemas_get_tailored_prompts() {
        assert!(default_prompt_for("invoice").contains("invoice number"));
        assert!(default_prompt_for("id_card").contains("ID card"));
        assert!(default_prompt_for("resume").contains("resume"));
        assert!(default_prompt_for("receipt").contains("merchant"));
    }

    #[test]
    fn custom_schema_gets_generic_prompt() {
        assert_eq!(default_prompt_for("purchase_order"), DEFAULT_PROMPT);
    }
}

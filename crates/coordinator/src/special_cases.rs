//! Short-circuits evaluated before classification.
//!
//! Order matters: empty input, then too-short input, then exact greeting and
//! help keywords, then oversized input. The first three answer with canned
//! text; oversized input is truncated and handled normally.

use switchboard_common::text::{normalize, truncate_chars};
use switchboard_common::IntentCategory;

/// Shortest input that goes through classification.
pub const MIN_INPUT_CHARS: usize = 3;

const GREETINGS: &[&str] = &[
    "oi", "ola", "bom dia", "boa tarde", "boa noite", "hello", "hi",
];

const HELP_WORDS: &[&str] = &["ajuda", "help", "menu", "comandos"];

pub const EMPTY_RESPONSE: &str =
    "Sua mensagem chegou vazia. Escreva o que você precisa ou digite \"ajuda\" para ver o que posso fazer.";

pub const TOO_SHORT_RESPONSE: &str =
    "Mensagem muito curta. Descreva um pouco mais o que você precisa ou digite \"ajuda\".";

pub const GREETING_RESPONSE: &str =
    "Olá! Posso buscar registros, sugerir ideias e analisar informações. Como posso ajudar?";

/// What to do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    /// Answer with this text, no delegation.
    Respond(String),
    /// Route `text`; prefix the answer with `notice` when present.
    Continue {
        text: String,
        notice: Option<String>,
    },
}

/// Run the short-circuit checks for `input`.
pub fn precheck(input: &str, max_input_chars: usize) -> Precheck {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Precheck::Respond(EMPTY_RESPONSE.to_string());
    }

    let normalized = normalize(trimmed);
    if trimmed.chars().count() < MIN_INPUT_CHARS {
        return Precheck::Respond(short_hint(&normalized));
    }

    if GREETINGS.contains(&normalized.as_str()) {
        return Precheck::Respond(GREETING_RESPONSE.to_string());
    }
    if HELP_WORDS.contains(&normalized.as_str()) {
        return Precheck::Respond(help_text());
    }

    let total = trimmed.chars().count();
    if total > max_input_chars {
        return Precheck::Continue {
            text: truncate_chars(trimmed, max_input_chars).to_string(),
            notice: Some(format!(
                "Sua mensagem tinha {total} caracteres; considerei apenas os primeiros {max_input_chars}."
            )),
        };
    }

    Precheck::Continue {
        text: trimmed.to_string(),
        notice: None,
    }
}

/// Command hints for one- and two-character inputs.
fn short_hint(normalized: &str) -> String {
    let category = match normalized {
        // Two-letter greetings are shorter than the minimum
        "oi" | "hi" => return GREETING_RESPONSE.to_string(),
        "b" => IntentCategory::Search,
        "i" => IntentCategory::Ideation,
        "a" => IntentCategory::Analysis,
        _ => return TOO_SHORT_RESPONSE.to_string(),
    };
    format!(
        "{} Para {}, escreva por exemplo: \"{}\".",
        TOO_SHORT_RESPONSE,
        category.describe(),
        example_request(category)
    )
}

fn example_request(category: IntentCategory) -> &'static str {
    match category {
        IntentCategory::Search => "buscar a ata da última reunião",
        IntentCategory::Ideation => "ideias para o evento de fim de ano",
        IntentCategory::Analysis => "analisar as vendas do trimestre",
        IntentCategory::General | IntentCategory::Multiple => "",
    }
}

/// Structured help listing every specialised capability.
pub fn help_text() -> String {
    let mut text = String::from("Posso ajudar com:\n");
    for (i, category) in IntentCategory::SPECIALISED.iter().enumerate() {
        text.push_str(&format!(
            "{}. **{}**: {} (ex.: \"{}\")\n",
            i + 1,
            category.title(),
            category.describe(),
            example_request(*category)
        ));
    }
    text.push_str("Você também pode combinar pedidos na mesma mensagem.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn respond(input: &str) -> String {
        match precheck(input, 1000) {
            Precheck::Respond(text) => text,
            other => panic!("expected canned response, got {other:?}"),
        }
    }

    #[test]
    fn test_whitespace_is_empty() {
        assert_eq!(respond("  \n\t "), EMPTY_RESPONSE);
    }

    #[test]
    fn test_short_inputs_get_hints() {
        assert_eq!(respond("?"), TOO_SHORT_RESPONSE);
        assert!(respond("b").contains(IntentCategory::Search.describe()));
        assert!(respond("I").contains(IntentCategory::Ideation.describe()));
        assert_eq!(respond("xy"), TOO_SHORT_RESPONSE);
        assert_eq!(respond("oi"), GREETING_RESPONSE);
    }

    #[test]
    fn test_greetings_match_exactly() {
        assert_eq!(respond("  Bom   DIA "), GREETING_RESPONSE);
        assert_eq!(respond("Olá"), GREETING_RESPONSE);
        assert!(matches!(
            precheck("olá, busque a ata", 1000),
            Precheck::Continue { notice: None, .. }
        ));
    }

    #[test]
    fn test_help_lists_every_capability() {
        let help = respond("AJUDA");
        for category in IntentCategory::SPECIALISED {
            assert!(help.contains(category.title()));
        }
        assert_eq!(respond("menu"), help);
    }

    #[test]
    fn test_oversized_input_is_truncated_with_notice() {
        let long = "á".repeat(1200);
        match precheck(&long, 1000) {
            Precheck::Continue { text, notice } => {
                assert_eq!(text.chars().count(), 1000);
                assert!(notice.unwrap().contains("1200"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

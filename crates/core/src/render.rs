use std::collections::BTreeMap;

use tracing::warn;

/// Render a response template against the conversation context.
///
/// Templates use `{{ key }}` placeholders resolved from the context map. A
/// template that fails to render must not kill the turn, so the raw template is
/// returned and the failure is logged for the operator.
pub fn render(template: &str, context: &BTreeMap<String, String>) -> String {
    if !template.contains("{{") && !template.contains("{%") {
        return template.to_owned();
    }

    let mut tera_context = tera::Context::new();
    for (key, value) in context {
        tera_context.insert(key, value);
    }

    match tera::Tera::one_off(template, &tera_context, false) {
        Ok(rendered) => rendered,
        Err(error) => {
            warn!(%error, template, "template rendering failed, using raw template");
            template.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::render;

    fn context() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("policy_holder_name".to_owned(), "Asha".to_owned()),
            ("outstanding_amount".to_owned(), "12,000".to_owned()),
        ])
    }

    #[test]
    fn fills_placeholders_from_context() {
        let rendered = render(
            "Hello {{ policy_holder_name }}, your premium of {{ outstanding_amount }} is due.",
            &context(),
        );
        assert_eq!(rendered, "Hello Asha, your premium of 12,000 is due.");
    }

    #[test]
    fn plain_text_passes_through_untouched() {
        assert_eq!(render("Shall we continue?", &context()), "Shall we continue?");
    }

    #[test]
    fn broken_template_degrades_to_raw_text() {
        let rendered = render("Hello {{ policy_holder_name", &context());
        assert_eq!(rendered, "Hello {{ policy_holder_name");
    }
}

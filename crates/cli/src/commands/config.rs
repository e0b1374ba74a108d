use branchline_core::AppConfig;

/// Effective configuration after file, environment, and flag overrides, with
/// the API key redacted.
pub fn run(config: &AppConfig) -> String {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let lines = [
        "effective config (source precedence: flags > env > file > default):".to_string(),
        format!("  flows.branches_path     = {}", config.flows.branches_path.display()),
        format!("  flows.suggestions_path  = {}", config.flows.suggestions_path.display()),
        format!("  llm.base_url            = {}", config.llm.base_url),
        format!("  llm.model               = {}", config.llm.model),
        format!("  llm.api_key             = {api_key}"),
        format!("  llm.timeout_secs        = {}", config.llm.timeout_secs),
        format!("  llm.confidence_threshold = {}", config.llm.confidence_threshold),
        format!("  logging.level           = {}", config.logging.level),
        format!("  logging.format          = {:?}", config.logging.format),
    ];
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use branchline_core::AppConfig;

    #[test]
    fn output_never_contains_a_key_material_field() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("super-secret".to_string().into());
        let rendered = super::run(&config);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("super-secret"));
    }
}

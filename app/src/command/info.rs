use parley_config::Config;

/// Strategy for displaying configuration information.
///
/// Secrets are masked; the identity token is only reported as set or not.
#[derive(Debug, Clone, Copy)]
pub struct InfoStrategy;

impl super::CommandStrategy for InfoStrategy {
    type Input = ();

    async fn execute(&self, _input: Self::Input) -> anyhow::Result<()> {
        let config = Config::load()?;

        println!("=== parley Configuration ===\n");
        println!("Config file: {}", Config::config_path()?.display());
        println!();

        println!("Service:");
        println!("  Endpoint: {}", config.service.endpoint);
        println!("  API Key: {}", mask_secret(&config.service.api_key));
        println!("  Timeout: {}s", config.service.timeout_secs);
        println!();

        println!("Identity:");
        let token = match config.session_config().identity_token {
            Some(_) => "(set)",
            None => "(not set, a local identity will be generated)",
        };
        println!("  Token: {token}");

        Ok(())
    }
}

fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        "(not set)".to_string()
    } else if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}

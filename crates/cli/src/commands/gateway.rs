//! `scarlett gateway`: Start the HTTP API server.

use scarlett_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        eprintln!("  Warning: no API key configured, every chat turn will fail.");
        eprintln!("  Set SCARLETT_API_KEY or run `scarlett onboard` and edit the config.");
    }

    println!("Scarlett Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {} via {}", config.model, config.provider);

    scarlett_gateway::start(config).await?;

    Ok(())
}

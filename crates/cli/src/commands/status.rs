//! `pincer status`: Show the resolved configuration.

use pincer_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("Pincer Status");
    println!("=============");
    println!("  Config dir:       {}", AppConfig::config_dir().display());
    println!("  Workspace:        {}", config.workspace_dir().display());
    println!("  Provider:         {}", config.default_provider);
    println!("  Model:            {}", config.default_model);
    println!("  API key:          {}", if config.api_key.is_some() { "set" } else { "not set" });
    println!("  Context window:   {} tokens", config.agent.context_window_tokens);
    println!("  Tool iterations:  {}", config.agent.max_tool_iterations);
    println!("  Memory top-k:     {}", config.agent.memory_top_k);
    println!("  Turn timeout:     {}s", config.agent.direct_timeout_secs);
    println!("  Subagent timeout: {}s", config.subagent.default_timeout_secs);
    println!("  Queue capacity:   {}", config.hub.capacity);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file: {}", config_path.display());
    } else {
        println!("\n  No config file at {}, using defaults", config_path.display());
    }

    Ok(())
}

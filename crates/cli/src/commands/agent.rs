//! `pincer agent`: Interactive or single-message chat mode.

use pincer_agent::{AgentLoop, ContextBuilder};
use pincer_config::AppConfig;
use pincer_core::hub::{Hub, OutboundMessage};
use pincer_core::skill::SkillDirectory;
use pincer_core::workspace::FsWorkspace;
use pincer_memory::{FileMemoryStore, SimpleRanker};
use pincer_tools::{MessageTool, WebFetchTool, WriteMemoryTool};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub async fn run(message: Option<String>, timeout: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let router = pincer_providers::build_from_config(&config);
    let provider = router
        .default()
        .ok_or_else(|| format!("Provider '{}' is not available", config.default_provider))?;

    let workspace = config.workspace_dir();
    let Hub { outbound, mut outbound_rx, .. } = Hub::new(config.hub.capacity);
    let memory = Arc::new(FileMemoryStore::new(&workspace));

    let context = ContextBuilder::new()
        .with_workspace(Arc::new(FsWorkspace::new(&workspace)))
        .with_skills(Arc::new(SkillDirectory::new(workspace.join("skills"))))
        .with_ranker(Arc::new(SimpleRanker::new()), config.agent.memory_top_k);

    let web = WebFetchTool::new(
        Duration::from_secs(config.tools.web_fetch_timeout_secs),
        config.tools.web_fetch_max_bytes,
    )?;

    let agent = AgentLoop::builder(provider, outbound.clone())
        .with_config(&config)
        .with_model(&config.default_model)
        .with_context_builder(context)
        .with_memory(Arc::clone(&memory))
        .with_tool(Box::new(MessageTool::new(outbound)))
        .with_tool(Box::new(web))
        .with_tool(Box::new(WriteMemoryTool::new(memory)))
        .build();

    let turn_timeout = Duration::from_secs(timeout.unwrap_or(config.agent.direct_timeout_secs));

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = agent.process_direct(&msg, turn_timeout).await;
        eprint!("\r              \r");
        println!("{}", result?);

        // Background runs started by this turn report before we exit
        let active = agent.supervisor().active();
        if !active.is_empty() {
            for run in &active {
                eprintln!("  Waiting for subagent {}...", run.label.as_deref().unwrap_or(run.run_id.as_str()));
            }
            let grace = Duration::from_secs(config.subagent.default_timeout_secs + 5);
            if tokio::time::timeout(grace, agent.supervisor().drain()).await.is_err() {
                agent.supervisor().cancel_all();
            }
        }
        while let Ok(out) = outbound_rx.try_recv() {
            print_outbound(&out);
        }
    } else {
        // Interactive mode
        println!();
        println!("  ╔══════════════════════════════════════════════╗");
        println!("  ║         Pincer Agent — Interactive Mode      ║");
        println!("  ╚══════════════════════════════════════════════╝");
        println!();
        println!("  Provider:  {}", config.default_provider);
        println!("  Model:     {}", agent.model());
        println!("  Tools:     {}", agent.tools().names().join(", "));
        println!("  Workspace: {}", workspace.display());
        println!();
        println!("  Type your message and press Enter.");
        println!("  Type 'exit' or Ctrl+C to quit.");
        println!();

        let printer = tokio::spawn(print_outbound_stream(outbound_rx));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt()?;

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            let input = line.trim();
            if input.is_empty() {
                prompt()?;
                continue;
            }
            if matches!(input, "exit" | "quit") {
                break;
            }

            eprint!("  ...");
            match agent.process_direct(input, turn_timeout).await {
                Ok(response) => {
                    eprint!("\r     \r");
                    println!();
                    for line in response.lines() {
                        println!("  Assistant > {line}");
                    }
                    println!();
                }
                Err(e) => {
                    eprint!("\r     \r");
                    eprintln!("  [Error] {e}");
                    println!();
                }
            }
            prompt()?;
        }

        agent.shutdown().await;
        printer.abort();

        println!();
        println!("  Goodbye!");
        println!();
    }

    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

async fn print_outbound_stream(mut rx: mpsc::Receiver<OutboundMessage>) {
    while let Some(out) = rx.recv().await {
        println!();
        print_outbound(&out);
        print!("  You > ");
        let _ = std::io::stdout().flush();
    }
}

fn print_outbound(out: &OutboundMessage) {
    println!("  [{}:{}]", out.channel, out.chat_id);
    for line in out.content.lines() {
        println!("  {line}");
    }
    println!();
}

//! CodinGLM: an interactive terminal coding assistant that brokers a
//! streaming conversation between a developer and an LLM, giving the model
//! tool access to the local machine.

mod log_format;
mod logging;
mod repl;
mod transcript;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use codinglm_core::tools::file::{EditTool, GlobTool, GrepTool, ReadTool, WriteTool};
use codinglm_core::tools::{ShellTool, SubAgentTool, TodoWriteTool, VcsTool, WebFetchTool};
use codinglm_core::{AnthropicClient, Compressor, LlmClient, PluginConfig, PluginManager, Registry};

use repl::App;
use transcript::Transcript;

const SYSTEM_PROMPT: &str = "\
You are CodinGLM, an interactive terminal coding assistant. You can read, write, \
and edit files, run shell commands, inspect version control, fetch web pages, and \
delegate bounded sub-tasks. Use the available tools to complete the developer's \
request, and report back concisely.";

#[derive(Parser, Debug)]
#[command(name = "codinglm")]
#[command(about = "CodinGLM — interactive terminal coding assistant")]
struct Args {
    /// Initial message to send before entering the interactive loop
    message: Option<String>,

    /// Path to a config file, overriding discovery
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the model selected by config/environment
    #[arg(long, value_name = "NAME")]
    model: Option<String>,
}

fn build_registry(llm: Arc<dyn LlmClient>) -> Arc<Registry> {
    let mut base = Registry::new();
    base.register(Arc::new(ReadTool));
    base.register(Arc::new(WriteTool));
    base.register(Arc::new(EditTool));
    base.register(Arc::new(GlobTool));
    base.register(Arc::new(GrepTool));
    base.register(Arc::new(VcsTool));
    base.register(Arc::new(WebFetchTool));
    base.register(Arc::new(TodoWriteTool::new()));

    let shell = ShellTool::new();
    base.register(Arc::new(shell.job_output_tool()));
    base.register(Arc::new(shell.kill_job_tool()));
    base.register(Arc::new(shell));

    let base = Arc::new(base);
    let sub_agent = SubAgentTool::new(llm, base.clone());

    let mut full = Registry::new();
    for name in base.names() {
        if let Some(tool) = base.get(&name) {
            full.register(tool);
        }
    }
    full.register(Arc::new(sub_agent));

    Arc::new(full)
}

async fn register_mcp_providers(plugins: &PluginManager, config: &codinglm_config::Config) {
    for (name, server) in &config.mcp_servers {
        plugins
            .register(
                name.clone(),
                PluginConfig {
                    command: server.command.clone(),
                    args: server.args.clone(),
                    env: server.env.clone(),
                },
            )
            .await;
        if !plugins.enable(name).await {
            eprintln!("warning: failed to enable MCP provider '{}'", name);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match codinglm_config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("codinglm: configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let session_uuid = uuid::Uuid::new_v4().simple().to_string();
    let session_id = session_uuid[..8].to_string();
    let _logging_guard = match logging::init(&session_id) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("codinglm: failed to initialize logging: {}", e);
            None
        }
    };

    let model = args.model.unwrap_or_else(|| config.model.clone());

    let mut main_llm = AnthropicClient::new(config.api_key.clone(), model.clone(), config.api_base.clone(), config.api_timeout_ms);
    main_llm.temperature = config.temperature;
    main_llm.max_tokens = config.max_tokens;

    let mut sub_agent_llm = AnthropicClient::new(config.api_key.clone(), model, config.api_base.clone(), config.api_timeout_ms);
    sub_agent_llm.temperature = config.temperature;
    sub_agent_llm.max_tokens = config.max_tokens;

    let registry = build_registry(Arc::new(sub_agent_llm));

    let plugins = Arc::new(PluginManager::new());
    register_mcp_providers(&plugins, &config).await;

    let compressor = Compressor::new(config.compression.clone());

    let transcript = match Transcript::open(&session_id) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("codinglm: failed to open on-disk logs: {}", e);
            std::process::exit(1);
        }
    };

    let mut app = App::new(
        SYSTEM_PROMPT,
        compressor,
        registry,
        plugins,
        main_llm,
        config.max_tool_iterations,
        transcript,
    );

    if let Some(message) = args.message.filter(|m| !m.trim().is_empty()) {
        println!("> {}", message);
        let reply = app.run_user_turn(&message).await;
        println!("{}", reply);
    }

    let code = repl::run_repl_loop(&mut app).await;
    app.shutdown().await;
    std::process::exit(code);
}

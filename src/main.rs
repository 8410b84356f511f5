//! omecmd CLI
//!
//! Entry point for the `omecmd` command-line tool.

use clap::{Parser, Subcommand};
use omecmd::callback::StepEvent;
use omecmd::classify::classify;
use omecmd::config::{host_config_path, EffectiveConfig};
use omecmd::host::{CallContext, CmdClient, CommandTransport, FailureKind, Handle, MockTransport, Transport};
use omecmd::logging::{init_logging, LogFormat};
use omecmd::mock::MockServer;
use omecmd::protocol::{Request, ALL_GROUPS};
use omecmd::signal::SignalHandler;
use omecmd::{ContextError, Outcome, RunContext};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::info;

/// Exit code for configuration and usage errors
const EXIT_CODE_CONFIG: i32 = 1;

#[derive(Parser)]
#[command(name = "omecmd")]
#[command(about = "Submit and follow asynchronous server commands", version)]
struct Cli {
    /// Talk to an in-process mock server instead of the configured transport
    #[arg(long, global = true)]
    mock: bool,

    /// Config file layered over ~/.config/omecmd/config.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log output format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a request, wait for it, and print the response
    Submit {
        /// JSON file holding the request
        request: PathBuf,

        /// Act under this group (-1 for all groups)
        #[arg(long, allow_hyphen_values = true)]
        group: Option<i64>,

        /// Status queries before giving up
        #[arg(long)]
        loops: Option<u32>,

        /// Cap on one sleep between status queries
        #[arg(long)]
        ms_per_loop: Option<u64>,

        /// Succeed only if the command fails
        #[arg(long)]
        expect_failure: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the current status of a handle
    Status {
        handle: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Request cancellation of a running command
    Cancel { handle: String },

    /// Release a handle
    Close { handle: String },

    /// Print the effective configuration
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print server capabilities and the derived scaling factor
    Probe {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(EXIT_CODE_CONFIG);
        }
    };

    if let Err(e) = init_logging(&config.settings().logging) {
        eprintln!("Warning: {}", e);
    }

    if let Commands::Config { json } = cli.command {
        run_config(&config, json);
        return;
    }

    let ctx = match connect(cli.mock, &config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error connecting: {}", e);
            process::exit(e.exit_code());
        }
    };

    let code = match cli.command {
        Commands::Submit {
            request,
            group,
            expect_failure,
            json,
            ..
        } => run_submit(ctx, &request, group, expect_failure, json),
        Commands::Status { handle, json } => run_status(ctx, &handle, json),
        Commands::Cancel { handle } => run_cancel(ctx, &handle),
        Commands::Close { handle } => run_close(ctx, &handle),
        Commands::Probe { json } => run_probe(ctx, json),
        Commands::Config { .. } => 0,
    };
    process::exit(code);
}

/// Translate CLI flags into the top configuration layer
fn cli_overrides(cli: &Cli) -> Value {
    let mut overrides = json!({});
    if let Some(format) = cli.log_format {
        let format = match format {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        };
        overrides["logging"] = json!({ "format": format });
    }
    if let Commands::Submit {
        group,
        loops,
        ms_per_loop,
        ..
    } = &cli.command
    {
        let mut callback = json!({});
        if let Some(loops) = loops {
            callback["loops"] = json!(loops);
        }
        if let Some(ms) = ms_per_loop {
            callback["ms_per_loop"] = json!(ms);
        }
        overrides["callback"] = callback;
        if let Some(group) = group {
            overrides["session"] = json!({ "group": group });
        }
    }
    overrides
}

fn load_config(cli: &Cli) -> Result<EffectiveConfig, String> {
    let host = host_config_path();
    EffectiveConfig::build(host.as_deref(), cli.config.as_deref(), Some(cli_overrides(cli)))
        .map_err(|e| e.to_string())
}

fn connect(mock: bool, config: &EffectiveConfig) -> Result<RunContext, ContextError> {
    let settings = config.settings();

    let (transport, session): (Arc<dyn Transport>, Option<String>) = if mock {
        let server = MockServer::new();
        let session = server.root_session();
        (Arc::new(MockTransport::with_server(server)), Some(session))
    } else {
        let Some(command) = settings.transport.clone() else {
            eprintln!("No transport configured; set [transport] program/args or pass --mock");
            process::exit(EXIT_CODE_CONFIG);
        };
        (Arc::new(CommandTransport::new(command)), settings.session_key.clone())
    };

    let mut client = CmdClient::new(transport);
    if let Some(session) = session {
        client = client.with_session(session);
    }
    RunContext::setup(client, settings)
}

fn run_config(config: &EffectiveConfig, json_output: bool) {
    if json_output {
        match config.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(EXIT_CODE_CONFIG);
            }
        }
        return;
    }

    println!("Effective configuration ({})", config.schema_id);
    println!();
    for source in &config.sources {
        match &source.path {
            Some(path) => println!("  {:?}: {}", source.origin, path),
            None => println!("  {:?}", source.origin),
        }
    }
    println!();
    match serde_json::to_string_pretty(&config.config) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(EXIT_CODE_CONFIG);
        }
    }
}

fn run_submit(mut ctx: RunContext, path: &Path, group: Option<i64>, expect_failure: bool, json_output: bool) -> i32 {
    let request = match read_request(path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error reading request: {}", e);
            return EXIT_CODE_CONFIG;
        }
    };

    let context = match group {
        Some(ALL_GROUPS) => CallContext::all_groups(),
        Some(g) => CallContext::group(g),
        None => ctx.default_context().clone(),
    };

    let signals = SignalHandler::new();
    if let Err(e) = signals.install() {
        eprintln!("Warning: could not install Ctrl-C handler: {}", e);
    }
    let state = signals.state();
    state.set_client(ctx.shared_client());

    let handle = match ctx.submit(&request, &context) {
        Ok(h) => h,
        Err(e) => return report_error(&e),
    };
    state.register(&handle);
    info!(handle = %handle.id(), kind = handle.kind(), total = handle.total_steps(), "submitted");

    let waited = ctx
        .callback(&handle)
        .on_step(|event: StepEvent| info!(step = event.step, total = event.total, "progress"))
        .block();
    state.unregister(&handle);
    let closed = ctx.client().close(&handle);

    let completion = match waited {
        Ok(c) => c,
        Err(e) => return report_error(&ContextError::from(e)),
    };
    if let Err(e) = closed {
        return report_error(&ContextError::from(e));
    }

    let outcome = classify(&completion, !expect_failure);
    let response = match &outcome {
        Ok(o) => o.response(),
        Err(_) => &completion.response,
    };

    if json_output {
        let output = json!({
            "handle": handle.id(),
            "flags": completion.status.flags_label(),
            "response": response,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return EXIT_CODE_CONFIG;
            }
        }
    } else {
        println!("Handle: {}", handle.id());
        println!("Status: {}", completion.status.flags_label());
        print_response(response);
    }

    match outcome {
        Ok(Outcome::Succeeded(_)) | Ok(Outcome::Failed(_)) => 0,
        Err(e) => report_error(&ContextError::from(e)),
    }
}

fn read_request(path: &Path) -> Result<Request, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let request: Request = serde_json::from_str(&contents).map_err(|e| format!("{}: {}", path.display(), e))?;
    request.validate().map_err(|e| e.to_string())?;
    Ok(request)
}

fn print_response(response: &omecmd::Response) {
    if let Some(error) = response.error() {
        println!("Error: {}", error);
    }
    if let Some(success) = response.success() {
        for (type_name, ids) in success.objects.iter() {
            println!("  {}: {:?}", type_name, ids);
        }
        for (type_name, ids) in success.deleted.iter() {
            println!("  deleted {}: {:?}", type_name, ids);
        }
    }
    if let Some(subs) = response.sub_responses() {
        for (index, sub) in subs.iter().enumerate() {
            println!("[{}]", index);
            print_response(sub);
        }
    }
}

fn run_status(ctx: RunContext, id: &str, json_output: bool) -> i32 {
    let handle = Handle::attach(id);
    let status = match ctx.client().status(&handle) {
        Ok(s) => s,
        Err(e) => return report_error(&ContextError::from(e)),
    };

    if json_output {
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return EXIT_CODE_CONFIG;
            }
        }
    } else {
        println!("Handle: {}", id);
        println!("Step: {}/{}", status.step, status.total);
        println!("Flags: {}", status.flags_label());
    }
    0
}

fn run_cancel(ctx: RunContext, id: &str) -> i32 {
    let handle = Handle::attach(id);
    match ctx.client().cancel(&handle) {
        Ok(true) => {
            println!("Cancelled {}", id);
            0
        }
        Ok(false) => {
            println!("{} had already stopped", id);
            0
        }
        Err(e) => report_error(&ContextError::from(e)),
    }
}

fn run_close(ctx: RunContext, id: &str) -> i32 {
    let handle = Handle::attach(id);
    match ctx.client().close(&handle) {
        Ok(()) => {
            println!("Closed {}", id);
            0
        }
        Err(e) => report_error(&ContextError::from(e)),
    }
}

fn run_probe(ctx: RunContext, json_output: bool) -> i32 {
    let probe = ctx.probe();
    if json_output {
        let output = json!({
            "protocol_min": probe.protocol_min,
            "protocol_max": probe.protocol_max,
            "server_version": probe.server_version,
            "backoff": probe.backoff,
            "negotiated_version": ctx.client().negotiated_version(),
            "scaling_ms": ctx.scaling_ms(),
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return EXIT_CODE_CONFIG;
            }
        }
    } else {
        println!("Server: {}", probe.server_version);
        println!("Protocol: {}..={}", probe.protocol_min, probe.protocol_max);
        if let Some(version) = ctx.client().negotiated_version() {
            println!("Negotiated: {}", version);
        }
        println!("Backoff: {} x {}ms", probe.backoff.count, probe.backoff.ms);
        println!("Scaling: {}ms per loop", ctx.scaling_ms());
    }
    0
}

fn report_error(error: &ContextError) -> i32 {
    eprintln!("Error: {}", error);
    let kind = error.failure_kind();
    if kind == FailureKind::Cancelled {
        eprintln!("Command was interrupted; the handle has been closed");
    }
    kind.exit_code()
}

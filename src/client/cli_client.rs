use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::client::config::ClientConfig;
use crate::client::models::progress::ProgressDisplay;
use crate::client::services::api_client::{ApiClient, ApiError};
use crate::client::services::event_stream::EventStreamConsumer;
use crate::client::services::health::ConnectionHealthTracker;
use crate::common::events::ProgressEvent;
use crate::common::models::{ConversionType, Device};
use crate::common::protocol::{
    BatchConvertRequest, DialogMode, FileDialogRequest, MarkdownToNoteRequest, NoteToMarkdownRequest,
    PdfToNoteRequest, PngToNoteRequest, WorkflowRunRequest,
};

#[derive(Parser, Debug)]
#[command(name = "supernote-sync")]
#[command(about = "Client for the Supernote conversion service")]
pub struct Cli {
    /// Backend URL, overrides SUPERNOTE_BACKEND_URL
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Skip the reachability check before operations
    #[arg(long, global = true)]
    pub no_check: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show service status and version
    Status,
    /// List the external tools the service depends on
    Deps,
    /// Exit non-zero if the service is unreachable
    Check,
    /// Convert a single file
    Convert {
        #[command(subcommand)]
        kind: ConvertCommand,
    },
    /// Convert many files of the same kind
    Batch {
        #[arg(short = 't', long = "type")]
        conversion_type: ConversionType,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        #[arg(short, long)]
        output_dir: Option<String>,
        #[command(flatten)]
        target: TargetArgs,
        /// Print progress from the event stream while waiting
        #[arg(long)]
        follow: bool,
    },
    /// Inspect and run workflows
    Workflows {
        #[command(subcommand)]
        action: WorkflowCommand,
    },
    /// List a directory on the service host
    Browse {
        path: Option<String>,
        /// Only show files with this extension, e.g. `.md`
        #[arg(long)]
        ext: Option<String>,
    },
    /// List drives on the service host
    Drives,
    /// Open a native picker on the service host
    Pick {
        #[arg(long)]
        directory: bool,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        initial_dir: Option<String>,
    },
    /// Print stream events and connection changes until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum ConvertCommand {
    MdToNote {
        input: String,
        #[arg(short, long)]
        output: Option<String>,
        #[command(flatten)]
        target: TargetArgs,
        /// Write the note link back into the markdown frontmatter
        #[arg(long)]
        update_markdown: bool,
    },
    NoteToMd {
        input: String,
        #[arg(short, long)]
        output: Option<String>,
        #[arg(long)]
        image_dir: Option<String>,
    },
    PdfToNote {
        input: String,
        #[arg(short, long)]
        output: Option<String>,
        #[command(flatten)]
        target: TargetArgs,
    },
    PngToNote {
        input: String,
        #[arg(short, long)]
        output: Option<String>,
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        template: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    List,
    Show {
        id: String,
    },
    Run {
        id: String,
        /// Files to run over instead of the workflow's own sources
        inputs: Vec<String>,
        #[arg(short, long)]
        output_dir: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    #[arg(short, long)]
    pub device: Option<Device>,
    /// Enable realtime handwriting recognition
    #[arg(long)]
    pub realtime: bool,
}

impl TargetArgs {
    fn device(&self, config: &ClientConfig) -> Device {
        self.device.unwrap_or(config.default_device)
    }

    /// `None` leaves the choice to the service (markdown frontmatter).
    fn realtime(&self, config: &ClientConfig) -> Option<bool> {
        (self.realtime || config.default_realtime).then_some(true)
    }
}

impl Command {
    /// Commands that talk to the backend and so go through the auto-check.
    fn needs_backend(&self) -> bool {
        !matches!(self, Command::Status | Command::Check | Command::Watch)
    }
}

pub async fn run(cli: Cli, mut config: ClientConfig) -> anyhow::Result<()> {
    if let Some(backend) = cli.backend {
        config.backend_url = backend;
    }
    let client = ApiClient::new(&config.backend_url, config.request_timeout)?;

    if config.auto_check_connection && !cli.no_check && cli.command.needs_backend() && !client.check_connection().await {
        bail!("Backend unavailable at {}. Is the conversion service running?", config.backend_url);
    }

    match cli.command {
        Command::Status => {
            let status = client.get_status().await?;
            println!("Backend: {} ({})", status.status, config.backend_url);
            println!("Version: {}", status.version);
            if let Some(uptime) = status.uptime() {
                println!("Uptime:  {}", uptime);
            }
        }
        Command::Deps => {
            for (key, dep) in client.get_dependencies().await? {
                let state = if dep.available { "available" } else { "missing" };
                let version = dep.version.as_deref().unwrap_or("-");
                println!("{:<12} {:<10} {:<10} {}", key, state, version, dep.path.as_deref().unwrap_or(""));
            }
        }
        Command::Check => {
            if !client.check_connection().await {
                bail!("Backend unavailable at {}", config.backend_url);
            }
            println!("Backend reachable at {}", config.backend_url);
        }
        Command::Convert { kind } => convert(&client, &config, kind).await?,
        Command::Batch {
            conversion_type,
            inputs,
            output_dir,
            target,
            follow,
        } => {
            let output_dir = output_dir
                .or_else(|| config.default_output_dir.clone())
                .context("--output-dir is required when SUPERNOTE_DEFAULT_OUTPUT_DIR is unset")?;
            let request = BatchConvertRequest {
                input_paths: inputs,
                output_dir,
                conversion_type,
                device: Some(target.device(&config)),
                realtime: target.realtime(&config),
            };
            let result = with_progress(&config, follow, client.batch_convert(&request)).await?;
            for item in &result.results {
                println!("{}", item.summary());
            }
            println!("{} files: {} succeeded, {} failed", result.total, result.successful, result.failed);
            if result.has_failures() {
                bail!("{} of {} conversions failed", result.failed, result.total);
            }
        }
        Command::Workflows { action } => workflows(&client, &config, action).await?,
        Command::Browse { path, ext } => {
            let listing = client.browse_files(path.as_deref(), ext.as_deref()).await?;
            println!("{}", listing.current_path);
            for item in listing.items {
                let marker = if item.is_dir { "/" } else { "" };
                println!("  {}{}", item.name, marker);
            }
        }
        Command::Drives => {
            for drive in client.list_drives().await? {
                println!("{:<10} {}", drive.name, drive.path);
            }
        }
        Command::Pick {
            directory,
            title,
            initial_dir,
        } => {
            let request = FileDialogRequest {
                mode: if directory { DialogMode::Directory } else { DialogMode::File },
                title,
                initial_dir,
                file_types: None,
            };
            let picked = client.open_file_dialog(&request).await?;
            match picked.path.filter(|_| picked.selected) {
                Some(path) => println!("{}", path),
                None => println!("Nothing selected"),
            }
        }
        Command::Watch => watch(client, &config).await?,
    }
    Ok(())
}

async fn convert(client: &ApiClient, config: &ClientConfig, kind: ConvertCommand) -> anyhow::Result<()> {
    let out_dir = config.default_output_dir.as_deref();
    let result = match kind {
        ConvertCommand::MdToNote {
            input,
            output,
            target,
            update_markdown,
        } => {
            let output = output.unwrap_or_else(|| default_output(&input, out_dir, "note"));
            let mut request = MarkdownToNoteRequest::new(input, output);
            request.device = Some(target.device(config));
            request.realtime = target.realtime(config);
            request.update_markdown = update_markdown.then_some(true);
            client.convert_markdown_to_note(&request).await?
        }
        ConvertCommand::NoteToMd { input, output, image_dir } => {
            let output = output.unwrap_or_else(|| default_output(&input, out_dir, "md"));
            let mut request = NoteToMarkdownRequest::new(input, output);
            request.image_dir = image_dir;
            client.convert_note_to_markdown(&request).await?
        }
        ConvertCommand::PdfToNote { input, output, target } => {
            let request = PdfToNoteRequest {
                output_path: output.unwrap_or_else(|| default_output(&input, out_dir, "note")),
                input_path: input,
                device: Some(target.device(config)),
                realtime: target.realtime(config),
            };
            client.convert_pdf_to_note(&request).await?
        }
        ConvertCommand::PngToNote {
            input,
            output,
            target,
            template,
        } => {
            let request = PngToNoteRequest {
                output_path: output.unwrap_or_else(|| default_output(&input, out_dir, "note")),
                input_path: input,
                device: Some(target.device(config)),
                template_name: template,
                realtime: target.realtime(config),
            };
            client.convert_png_to_note(&request).await?
        }
    };

    if let Some(reason) = result.failure_reason() {
        bail!("Conversion failed: {}", reason);
    }
    println!("{}", result.summary());
    Ok(())
}

async fn workflows(client: &ApiClient, config: &ClientConfig, action: WorkflowCommand) -> anyhow::Result<()> {
    match action {
        WorkflowCommand::List => {
            let workflows = client.list_workflows().await?;
            if workflows.is_empty() {
                println!("No workflows defined");
            }
            for wf in workflows {
                println!("{:<20} {:<24} {:<5} {}", wf.id, wf.name, wf.device, wf.step_outline());
            }
        }
        WorkflowCommand::Show { id } => {
            let wf = client.get_workflow(&id).await?;
            println!("{} ({})", wf.name, wf.id);
            if let Some(description) = wf.description.as_deref().filter(|d| !d.is_empty()) {
                println!("{}", description);
            }
            println!("Device: {}  Note type: {:?}", wf.device, wf.note_type);
            for (i, step) in wf.steps.iter().enumerate() {
                println!("  {}. {}:{}", i + 1, step.step_type, step.action);
            }
        }
        WorkflowCommand::Run {
            id,
            inputs,
            output_dir,
            dry_run,
            follow,
        } => {
            let request = WorkflowRunRequest {
                input_paths: (!inputs.is_empty()).then_some(inputs),
                output_dir: output_dir.or_else(|| config.default_output_dir.clone()),
                dry_run: dry_run.then_some(true),
            };
            let result = with_progress(config, follow, client.run_workflow(&id, &request)).await?;
            println!("{}", result.summary());
            for file in &result.output_files {
                println!("  -> {}", file);
            }
            for error in &result.errors {
                println!("  ! {}", error);
            }
            if !result.success {
                bail!("Workflow {} finished with {} failed file(s)", result.workflow_id, result.files_failed);
            }
        }
    }
    Ok(())
}

/// Await `request`, printing stream progress meanwhile when `follow` is set.
/// The stream is best-effort: if it cannot be opened the request still runs.
async fn with_progress<T, F>(config: &ClientConfig, follow: bool, request: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    if !follow {
        return request.await;
    }
    let consumer = match EventStreamConsumer::from_config(config) {
        Ok(consumer) => consumer,
        Err(e) => {
            warn!("[EVENTS] Progress unavailable: {}", e);
            return request.await;
        }
    };
    let mut events = consumer.subscribe_events();
    tokio::pin!(request);

    let result = loop {
        tokio::select! {
            result = &mut request => break result,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = progress_line(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("[EVENTS] Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break (&mut request).await,
            },
        }
    };
    consumer.dispose().await;
    result
}

fn progress_line(event: &ProgressEvent) -> Option<String> {
    if event.is_active() {
        return Some(ProgressDisplay::from_event(event).render_line());
    }
    match event.common().error {
        Some(error) if event.is_terminal() => Some(format!("{}: {}", event.event_type(), error)),
        _ => None,
    }
}

async fn watch(client: ApiClient, config: &ClientConfig) -> anyhow::Result<()> {
    let consumer = EventStreamConsumer::from_config(config)?;
    let tracker = ConnectionHealthTracker::spawn(Arc::new(client), consumer.subscribe_view(), config.status_poll_interval);
    let mut events = consumer.subscribe_events();
    let mut status = tracker.subscribe();
    info!("Watching {} (Ctrl-C to stop)", config.backend_url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                println!(
                    "[{}] {} (socket: {}, backend: {})",
                    current.last_check.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
                    current.label(),
                    if current.connected { "open" } else { "closed" },
                    if current.backend_available { "up" } else { "down" },
                );
            }
            event = events.recv() => match event {
                Ok(event) => match progress_line(&event) {
                    Some(line) => println!("{}", line),
                    None => println!("{}", event.event_type()),
                },
                Err(RecvError::Lagged(skipped)) => warn!("[EVENTS] Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(tracker);
    consumer.dispose().await;
    Ok(())
}

/// `<dir or input's dir>/<input stem>.<ext>`
fn default_output(input: &str, output_dir: Option<&str>, ext: &str) -> String {
    let input = Path::new(input);
    let file_name = input.with_extension(ext);
    let file_name = file_name.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let dir = match output_dir {
        Some(dir) => Path::new(dir).to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    dir.join(file_name).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::events::parse_event;

    #[test]
    fn parses_nested_subcommands_with_globals() {
        let cli = Cli::try_parse_from([
            "supernote-sync",
            "--backend",
            "http://10.0.0.5:8765",
            "workflows",
            "run",
            "daily",
            "a.md",
            "b.md",
            "--dry-run",
            "--follow",
        ])
        .unwrap();
        assert_eq!(cli.backend.as_deref(), Some("http://10.0.0.5:8765"));
        let Command::Workflows {
            action: WorkflowCommand::Run { id, inputs, dry_run, follow, .. },
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(id, "daily");
        assert_eq!(inputs, vec!["a.md", "b.md"]);
        assert!(dry_run && follow);
    }

    #[test]
    fn batch_requires_inputs_and_a_known_type() {
        assert!(Cli::try_parse_from(["supernote-sync", "batch", "-t", "md-to-note"]).is_err());
        assert!(Cli::try_parse_from(["supernote-sync", "batch", "-t", "doc-to-note", "a.doc"]).is_err());
        let cli = Cli::try_parse_from(["supernote-sync", "batch", "-t", "pdf-to-note", "a.pdf", "-d", "a6x"]).unwrap();
        let Command::Batch { conversion_type, target, .. } = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(conversion_type, ConversionType::PdfToNote);
        assert_eq!(target.device, Some(Device::A6X));
    }

    #[test]
    fn target_falls_back_to_configured_defaults() {
        let config = ClientConfig {
            default_device: Device::A6X2,
            ..Default::default()
        };
        let target = TargetArgs::default();
        assert_eq!(target.device(&config), Device::A6X2);
        assert_eq!(target.realtime(&config), None);

        let config = ClientConfig {
            default_realtime: true,
            ..config
        };
        assert_eq!(target.realtime(&config), Some(true));
    }

    #[test]
    fn auto_check_skips_diagnostic_commands() {
        assert!(!Command::Status.needs_backend());
        assert!(!Command::Check.needs_backend());
        assert!(!Command::Watch.needs_backend());
        assert!(Command::Drives.needs_backend());
    }

    #[test]
    fn default_output_swaps_extension() {
        assert_eq!(default_output("notes/today.md", None, "note"), "notes/today.note");
        assert_eq!(default_output("notes/today.md", Some("/out"), "note"), "/out/today.note");
        assert_eq!(default_output("scan.pdf", None, "note"), "scan.note");
    }

    #[test]
    fn progress_lines_for_active_and_failed_events() {
        let step = parse_event(r#"{"type":"workflow_step","step":2,"percent":0.4}"#).unwrap();
        assert_eq!(progress_line(&step).as_deref(), Some("Running workflow [ 40%] Step 2"));

        let failed = parse_event(r#"{"type":"conversion_error","error":"pandoc not found"}"#).unwrap();
        assert_eq!(progress_line(&failed).as_deref(), Some("conversion_error: pandoc not found"));

        let done = parse_event(r#"{"type":"batch_complete"}"#).unwrap();
        assert_eq!(progress_line(&done), None);
    }
}

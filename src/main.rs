//! mediatui - terminal task manager for media players and downloaders
//!
//! # Usage
//!
//! ```bash
//! # Launch the task monitor
//! mediatui
//!
//! # CLI mode (for automation)
//! mediatui play https://example.com/clip.mp4
//! mediatui download https://a/x.mp4 https://b/y.mp4 -m 1 -p tomp3
//! mediatui download https://a/x.mp4 --tui
//! mediatui programs --json
//! ```

use std::io::{stdout, Stdout};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{error, info};

use mediatui::app::App;
use mediatui::cli::{Cli, Command, ExitCode, Output};
use mediatui::commands;
use mediatui::config::Config;
use mediatui::context::AppContext;
use mediatui::logging::{self, LogTarget};
use mediatui::ui;

/// Terminal type alias for convenience
type Tui = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The monitor owns the terminal, so it logs to a file
    let target = if cli.is_cli_mode() {
        LogTarget::Stderr
    } else {
        LogTarget::File(logging::default_log_directory())
    };
    let _guard = logging::init(&cli.log_level, target).context("Failed to initialize logging")?;

    let output = Output::new(&cli);
    let ctx = match load_context(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            let code = match e.downcast_ref::<mediatui::Error>() {
                Some(err) => ExitCode::from(err),
                None => ExitCode::Error,
            };
            output.error(format!("{:#}", e), code);
            std::process::exit(code.into());
        }
    };

    if cli.is_cli_mode() {
        // CLI mode: execute command and exit
        let exit_code = run_cli(cli, &ctx, &output).await;
        ctx.shutdown();
        std::process::exit(exit_code.into());
    }

    // TUI mode, optionally with downloads queued from the command line
    if let Some(Command::Download(cmd)) = &cli.command {
        if let Err(e) = cmd.validate() {
            let code = output.error(e, ExitCode::InvalidArgs);
            std::process::exit(code.into());
        }
        let quiet = Output {
            json: false,
            quiet: true,
        };
        commands::enqueue_downloads(cmd, &ctx, &quiet);
    }
    run_tui(&ctx).await
}

fn load_context(cli: &Cli) -> Result<AppContext> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate()?;
    Ok(AppContext::build(config)?)
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli, ctx: &AppContext, output: &Output) -> ExitCode {
    match cli.command {
        Some(Command::Play(cmd)) => commands::play_cmd(cmd, ctx, output).await,

        Some(Command::Download(cmd)) => commands::download_cmd(cmd, ctx, output).await,

        Some(Command::Programs(cmd)) => commands::programs_cmd(cmd, ctx, output).await,

        Some(Command::Template(cmd)) => commands::template_cmd(cmd, output).await,

        None => {
            // handled by is_cli_mode
            ExitCode::Success
        }
    }
}

// =============================================================================
// TUI Mode
// =============================================================================

/// Initialize the terminal for TUI mode
fn init_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restore terminal to normal state
fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Run the task monitor until the user quits
async fn run_tui(ctx: &AppContext) -> Result<()> {
    ctx.start();
    info!("monitor started");

    let mut terminal = init_terminal()?;
    let mut app = App::new(ctx.manager.clone());

    let result = run_event_loop(&mut terminal, &mut app).await;

    // Always restore terminal, even on error
    restore_terminal(&mut terminal)?;
    ctx.shutdown();
    if let Err(e) = &result {
        error!(error = %e, "monitor exited with error");
    }
    result
}

/// Main event loop - handles input, refreshes the snapshot, renders
async fn run_event_loop(terminal: &mut Tui, app: &mut App) -> Result<()> {
    const TICK_RATE: Duration = Duration::from_millis(200);

    while app.running {
        app.refresh();
        terminal.draw(|frame| ui::tasks::render(frame, app))?;

        // crossterm polling blocks; keep the runtime's other tasks moving
        let ready = tokio::task::block_in_place(|| event::poll(TICK_RATE))?;
        if ready {
            if let Event::Key(key) = event::read()? {
                // Only handle key press events (ignore releases on Windows)
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key);
                }
            }
        }
    }

    Ok(())
}

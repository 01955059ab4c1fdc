//! FlowRunner CLI Entry Point
//!
//! Runs a workflow interactively on the terminal, or from a command script.
//!
//! # Usage
//!
//! ```bash
//! # Work through a workflow interactively
//! flowrunner morning.yaml
//!
//! # Replay commands from a file, printing JSON snapshots
//! flowrunner morning.yaml --script commands.txt --json
//!
//! # Only check the workflow file
//! flowrunner morning.yaml --validate
//! ```

use std::cell::RefCell;
use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use colored::Colorize;
use log::{error, info, warn};

use flowrunner::execution::{DefaultBlockFactory, Event, Execution, ExecutionContext, PauseToken};
use flowrunner::host::{command_help, parse_command, render_status, Command, ManualCountdown, ManualTimerService};
use flowrunner::monitoring::ExecutionTimeline;
use flowrunner::workflow::parser::load_workflow;
use flowrunner::{APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: String,
    script_path: Option<PathBuf>,
    skip_sleep: bool,
    json: bool,
    validate_only: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            script_path: None,
            skip_sleep: false,
            json: false,
            validate_only: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Guided Workflow Interpreter");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML file");
    println!();
    println!("Options:");
    println!("  --script PATH       Read commands from a file instead of stdin");
    println!("  --skip-sleep        Allow 'skip' to end timed waits early");
    println!("  --json              Print a JSON snapshot after every command");
    println!("  --validate          Load and validate the workflow, then exit");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("{}", command_help());
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--skip-sleep" => {
                config.skip_sleep = true;
            }
            "--json" => {
                config.json = true;
            }
            "--validate" => {
                config.validate_only = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--script" => {
                i += 1;
                if i >= args.len() {
                    return Err("--script requires a path argument".to_string());
                }
                config.script_path = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.workflow_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// One interactive run of a workflow with its in-memory services.
struct Session {
    execution: Execution,
    timers: ManualTimerService,
    countdown: ManualCountdown,
    factory: DefaultBlockFactory,
    pause_tokens: Vec<PauseToken>,
    skip_sleep: bool,
    json: bool,
}

impl Session {
    fn start(&mut self) -> Result<(), Box<dyn Error>> {
        let mut ctx = ExecutionContext::new(&mut self.timers, &mut self.countdown, &self.factory);
        self.execution.start(&mut ctx)?;
        Ok(())
    }

    /// Applies one command; returns false when the session should stop.
    fn apply(&mut self, command: Command) -> Result<bool, Box<dyn Error>> {
        let elapsed_route = match command {
            Command::Wait => match self.countdown.elapse() {
                Some(route) => Some(route),
                None => {
                    warn!("No countdown is running");
                    return Ok(true);
                }
            },
            _ => None,
        };

        let mut ctx = ExecutionContext::new(&mut self.timers, &mut self.countdown, &self.factory);
        match command {
            Command::Quit => return Ok(false),
            Command::Help => {
                println!("{}", command_help());
                return Ok(true);
            }
            Command::Status => {}
            Command::Pause => {
                let token = self.execution.request_timer_pause(&mut ctx)?;
                self.pause_tokens.push(token);
            }
            Command::Resume => match self.pause_tokens.pop() {
                Some(token) => self.execution.release_timer_pause(&mut ctx, token)?,
                None => warn!("Reminders are not paused"),
            },
            Command::Wait => {
                let route = elapsed_route.unwrap_or_default();
                self.execution.countdown_elapsed(&mut ctx, &route)?;
            }
            Command::Event { path, event } => {
                if event == Event::ForceFinish && !self.skip_sleep {
                    warn!("Skipping waits is disabled; start with --skip-sleep");
                    return Ok(true);
                }
                self.execution.dispatch(&mut ctx, &path, event)?;
            }
        }

        self.print_status()?;
        Ok(!self.execution.is_finished())
    }

    fn print_status(&self) -> Result<(), Box<dyn Error>> {
        let snapshot = self.execution.snapshot();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(());
        }

        if snapshot.finished {
            println!("{}", "Workflow finished".green().bold());
        } else {
            print!("{}", render_status(&snapshot));
        }
        if self.timers.is_paused() {
            println!("{}", "(reminders paused)".dimmed());
        }
        if let Some(countdown) = self.countdown.running() {
            let line = format!("(countdown: {} s, 'wait' to finish)", countdown.seconds);
            println!("{}", line.as_str().yellow());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Box<dyn Error>> {
        let mut ctx = ExecutionContext::new(&mut self.timers, &mut self.countdown, &self.factory);
        while let Some(token) = self.pause_tokens.pop() {
            self.execution.release_timer_pause(&mut ctx, token)?;
        }
        if !self.execution.is_finished() {
            warn!(
                "Stopped at block {} of {}",
                self.execution.current_index() + 1,
                self.execution.len()
            );
        }
        Ok(())
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    info!("Loading workflow: {}", config.workflow_path);
    let workflow = load_workflow(&config.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", config.workflow_path, e)
    })?;

    let mut block_count = 0;
    workflow.walk(&mut |_| block_count += 1);
    info!(
        "Workflow '{}' loaded: {} top-level blocks, {} in total",
        workflow.description,
        workflow.len(),
        block_count
    );

    if config.validate_only {
        println!("{}", "Workflow is valid".green());
        return Ok(());
    }

    let factory = DefaultBlockFactory;
    let mut execution = workflow.build(&factory);

    let timeline = Rc::new(RefCell::new(ExecutionTimeline::new()));
    ExecutionTimeline::attach(&timeline, &mut execution);
    execution.add_on_entered_listener(|_, block| {
        println!("{} {}", "->".cyan(), block.text().bold());
    });

    let mut session = Session {
        execution,
        timers: ManualTimerService::new(),
        countdown: ManualCountdown::new(),
        factory,
        pause_tokens: Vec::new(),
        skip_sleep: config.skip_sleep,
        json: config.json,
    };

    let (reader, interactive): (Box<dyn BufRead>, bool) = match &config.script_path {
        Some(path) => {
            info!("Reading commands from: {}", path.display());
            let file = File::open(path).map_err(|e| format!("Could not open script '{}': {}", path.display(), e))?;
            (Box::new(BufReader::new(file)), false)
        }
        None => (Box::new(BufReader::new(io::stdin())), true),
    };

    session.start()?;
    session.print_status()?;

    if !session.execution.is_finished() {
        prompt(interactive)?;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                prompt(interactive)?;
                continue;
            }
            if !interactive {
                println!("> {}", line);
            }

            let keep_going = match parse_command(line) {
                Ok(command) => session.apply(command)?,
                Err(e) => {
                    warn!("{} (type 'help' for commands)", e);
                    true
                }
            };
            if !keep_going {
                break;
            }
            prompt(interactive)?;
        }
    }

    session.finish()?;
    println!("{}", timeline.borrow().report());
    Ok(())
}

fn prompt(interactive: bool) -> io::Result<()> {
    if interactive {
        print!("> ");
        io::stdout().flush()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

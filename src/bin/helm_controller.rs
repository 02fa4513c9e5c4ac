/**
 * Helm Controller Binary
 *
 * Runs the vessel control stack:
 * 1. Loads the port and timing configuration
 * 2. Starts the periodic control loop
 * 3. Reads operator commands from stdin
 * 4. Prints the status line for each one
 *
 * Usage: helm_controller [config.json] [--simulate]
 * A missing config file falls back to the defaults (COM11/COM12/COM13).
 */

use anyhow::{bail, Context};
use helm_control::{CommandParams, CommandSupervisor, ControlLoop, HelmConfig, LinkOpener, SerialOpener, SimulatedOpener};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

fn load_config(path: Option<&str>) -> anyhow::Result<HelmConfig> {
    match path {
        Some(path) if Path::new(path).exists() => {
            HelmConfig::load(path).with_context(|| format!("reading {}", path))
        }
        Some(path) => {
            log::warn!("{} not found, using defaults", path);
            Ok(HelmConfig::default())
        }
        None => Ok(HelmConfig::default()),
    }
}

/// `<code> [json body]`, e.g. `1 {"Speed": 1.2}`.
fn parse_line(line: &str) -> anyhow::Result<(i32, CommandParams)> {
    let (code, body) = match line.split_once(char::is_whitespace) {
        Some((code, body)) => (code, body.trim()),
        None => (line, ""),
    };
    let code: i32 = code.parse().with_context(|| format!("bad command code {:?}", code))?;
    if body.is_empty() {
        return Ok((code, CommandParams::default()));
    }
    let params = serde_json::from_str(body).context("bad command body")?;
    Ok((code, params))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config_path = None;
    let mut simulate = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--simulate" => simulate = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            path => config_path = Some(path.to_string()),
        }
    }

    let config = load_config(config_path.as_deref())?;

    println!("==============================================");
    println!("  Helm Controller");
    println!("==============================================");
    println!("  Gear board:   {}", config.gear_port.name);
    println!("  Left rudder:  {}", config.left_rudder_port.name);
    println!("  Right rudder: {}", config.right_rudder_port.name);
    println!("  Simulated:    {}", simulate);
    println!("==============================================\n");

    let opener: Arc<dyn LinkOpener> = if simulate {
        Arc::new(SimulatedOpener::new())
    } else {
        Arc::new(SerialOpener::default())
    };
    let supervisor = Arc::new(CommandSupervisor::new(config, opener)?);
    let mut control = ControlLoop::start(Arc::clone(&supervisor))?;

    println!("[Commands]");
    println!("  <code> [json]  - e.g. 900, 1 {{\"Speed\": 1.2}}, 0");
    println!("  status         - print actuator state");
    println!("  x              - exit\n");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        match input.trim() {
            "" => {}
            "x" | "exit" | "quit" => break,
            "status" => println!("{}", serde_json::to_string_pretty(&supervisor.status())?),
            line => match parse_line(line) {
                Ok((code, params)) => println!("{}", supervisor.decision(code, params)),
                Err(e) => println!("{:#}", e),
            },
        }
    }

    println!("[SHUTDOWN]");
    control.stop();
    supervisor.decision(0, CommandParams::default());
    supervisor.wait_idle();
    Ok(())
}

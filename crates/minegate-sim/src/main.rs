//! Gate simulator
//!
//! Drives one verification session runtime from the console against a
//! scripted detection backend:
//! - stdin commands for session control, tag reads and overrides
//! - verification events printed as JSON lines

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use minegate_verification::mocks::{compliant_response, violation_response};
use minegate_verification::{
    Frame, GateId, GateVerificationController, MineId, MockAttendanceRecorder, MockGateApi,
    PpeRegistration, RfidScan, SessionHandle, SessionRuntime, VerificationConfig,
    VerificationItemType, Worker,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod command;

use command::{SimCommand, HELP};

/// Detection backend behaviour
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    /// Full PPE and a confident face match
    Compliant,
    /// Helmet missing
    Violation,
    /// Backend unreachable
    Offline,
}

/// Mine gate verification simulator
#[derive(Parser)]
#[command(name = "gate-sim")]
#[command(about = "Simulate a mine gate verification session", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MINEGATE_CONFIG")]
    config: Option<String>,

    /// Mine identifier
    #[arg(long, default_value = "MINE-01")]
    mine: String,

    /// Gate identifier
    #[arg(long, default_value = "GATE-01")]
    gate: String,

    /// Detection backend behaviour
    #[arg(long, value_enum, default_value = "compliant")]
    scenario: Scenario,

    /// Simulated detection latency in milliseconds
    #[arg(long, default_value_t = 400)]
    delay_ms: u64,

    /// Log level (overrides configuration)
    #[arg(long, env = "MINEGATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn demo_worker() -> Worker {
    Worker::new("EMP-1001", "Demo Worker").with_ppe(PpeRegistration {
        helmet_tag: Some("SIM-HELMET".into()),
        vest_tag: Some("SIM-VEST".into()),
        shoes_tag: Some("SIM-SHOES".into()),
    })
}

fn gate_api(scenario: Scenario, delay: Duration) -> MockGateApi {
    let api = match scenario {
        Scenario::Compliant => MockGateApi::returning(compliant_response(demo_worker(), 0.94)),
        Scenario::Violation => MockGateApi::returning(violation_response(
            &[VerificationItemType::Helmet],
            Some((demo_worker(), 0.94)),
        )),
        Scenario::Offline => MockGateApi::unavailable(),
    };
    api.with_delay(delay)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = VerificationConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    config.keyboard_rfid = true;
    config.validate().context("invalid configuration")?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, cli.json || config.logging.json);

    let controller = GateVerificationController::new(
        config,
        MineId(cli.mine.clone()),
        GateId(cli.gate.clone()),
        Arc::new(gate_api(cli.scenario, Duration::from_millis(cli.delay_ms))),
        Arc::new(MockAttendanceRecorder::new()),
    );
    let (handle, task) = SessionRuntime::spawn(controller);

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("event {}", line),
                Err(e) => tracing::warn!(error = %e, "Could not encode event"),
            }
        }
    });

    tracing::info!(mine = %cli.mine, gate = %cli.gate, scenario = ?cli.scenario, "Gate simulator ready");
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match SimCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("error: {}", e);
                continue;
            }
        };
        if command == SimCommand::Quit {
            break;
        }
        if let Err(e) = execute(&handle, command).await {
            println!("error: {}", e);
        }
    }

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn execute(handle: &SessionHandle, command: SimCommand) -> Result<()> {
    match command {
        SimCommand::Start => println!("session {}", handle.start_verification().await?),
        SimCommand::StartRfidOnly => println!("session {}", handle.start_rfid_only().await?),
        SimCommand::StartMlOnly => println!("session {}", handle.start_ml_only().await?),
        SimCommand::Key(key) => report_scan(handle.apply_key(key).await?),
        SimCommand::Scan { item, tag } => {
            report_scan(handle.apply_rfid_scan(RfidScan::new(tag, item)).await?)
        }
        SimCommand::Fault { item, reason } => handle.report_rfid_fault(item, reason).await?,
        SimCommand::Snap => {
            handle
                .push_frame(Frame::new("data:image/jpeg;base64,c2ltdWxhdGVk"))
                .await?;
            let outcome = handle.capture_snapshot(None).await?;
            println!("capture {:?}", outcome);
        }
        SimCommand::Role(role) => {
            handle.set_operator_role(role).await?;
            println!("operator role {}", role);
        }
        SimCommand::Override { role, reason } => {
            let record = handle.override_verdict(reason, role).await?;
            println!("override {}", serde_json::to_string(&record)?);
        }
        SimCommand::Attend => println!("attendance marked: {}", handle.retry_attendance().await?),
        SimCommand::Reset => handle.reset_verification().await?,
        SimCommand::Status => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot.state)?);
            println!(
                "verdict {} ({}/{}) time left {}s can override: {}",
                snapshot.verdict.overall,
                snapshot.verdict.passed_count,
                snapshot.verdict.total_checks,
                snapshot.state.time_remaining(),
                snapshot.can_override
            );
        }
        SimCommand::Audit => {
            for entry in handle.audit().await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        SimCommand::Help => println!("{}", HELP),
        SimCommand::Quit => {}
    }
    Ok(())
}

fn report_scan(applied: bool) {
    if !applied {
        println!("scan ignored: no open session accepting rfid");
    }
}

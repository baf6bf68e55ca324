/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use stonegate::device::drivers::{
    AncillaQubit, Ln2CoolingController, LaserController, PhotonicDetector, PulseSequencer,
    QecModule, QuantumRegister, Thermocouple,
};
use stonegate::device::DeviceKind;
use stonegate::physics::PhysicsEngine;
use stonegate::recorder::Recorder;
use stonegate::registry::DeviceRegistry;
use stonegate::session::{self, AppState};
use stonegate::{logger, schematic, simulator};

const DEFAULT_HARDWARE_PORT: u16 = 9001;
const DEFAULT_SIM_PORT: u16 = 8080;
const PHYSICS_TICK: Duration = Duration::from_millis(200);

/// Control-and-monitoring server for a laboratory apparatus.
#[derive(Parser, Debug)]
#[command(name = "stonegate", version, about)]
struct Args {
    /// Port to listen on (default: 9001 hardware, 8080 --sim).
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Legacy bare positional port argument.
    legacy_port: Option<u16>,

    /// Run against the simulated device graph instead of hardware drivers.
    #[arg(short = 's', long = "sim")]
    sim: bool,

    /// Root directory under which `shared/protocol/...` is resolved.
    /// Defaults to the current working directory.
    #[arg(long = "graph-dir")]
    graph_dir: Option<PathBuf>,

    /// Enable debug-level logging (overridden by $STONEGATE_LOG if unset).
    #[arg(long = "debug")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logger::StoneGateLogger::new(logger::resolve_level(args.debug))
        .init()
        .context("initializing logger")?;

    if let Err(e) = run(args).await {
        error!("fatal startup error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let graph_dir = match args.graph_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let port = args
        .port
        .or(args.legacy_port)
        .unwrap_or(if args.sim { DEFAULT_SIM_PORT } else { DEFAULT_HARDWARE_PORT });
    let mode = if args.sim { "sim" } else { "hardware" };

    info!(
        "starting stonegate git_commit={} build_time={} mode={mode} port={port}",
        env!("STONEGATE_GIT_COMMIT"),
        env!("STONEGATE_BUILD_TIME"),
    );

    let physics = Arc::new(PhysicsEngine::new());

    let registry = if args.sim {
        bootstrap_simulated(&graph_dir, Arc::clone(&physics)).await?
    } else {
        bootstrap_hardware(Arc::clone(&physics)).await
    };
    let registry = Arc::new(registry);

    let recordings_dir = graph_dir.join("recordings");
    let recorder = Arc::new(Recorder::new(recordings_dir, Arc::clone(&registry)));

    let state = AppState::new(
        Arc::clone(&registry),
        Some(Arc::clone(&physics)),
        Arc::clone(&recorder),
        graph_dir.clone(),
        port,
        mode,
    );

    let cancel = CancellationToken::new();
    session::spawn_broadcast_loop(Arc::clone(&state), cancel.clone());

    if args.sim {
        physics.start_background_loop(PHYSICS_TICK);
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding to port {port}"))?;
    info!("listening on 0.0.0.0:{port} (/status)");

    let router = session::router(state);
    let shutdown_cancel = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown_cancel))
        .await
        .context("serving websocket connections")?;

    cancel.cancel();
    physics.stop_background_loop();
    recorder.stop_all().await;
    info!("stonegate shut down cleanly");
    Ok(())
}

async fn bootstrap_simulated(graph_dir: &PathBuf, physics: Arc<PhysicsEngine>) -> Result<DeviceRegistry> {
    physics
        .load_parts_library(schematic::parts_library_path(graph_dir))
        .await
        .context("loading parts library")?;

    if let Err(e) = physics
        .load_device_overrides(schematic::device_overrides_path(graph_dir))
        .await
    {
        warn!("no usable device_overrides.json, continuing without overrides: {e}");
    }

    let (graph, schema) = simulator::load_graph_and_schema_for_boot(graph_dir)
        .await
        .context("loading device graph for simulation")?;

    simulator::build_simulated_registry(&graph, &schema, physics).await
}

/// Constructs the fixed lab rig: one instance of each known driver. Real
/// deployments would discover these via a hardware bus; that discovery
/// layer is out of scope here (§1).
async fn bootstrap_hardware(physics: Arc<PhysicsEngine>) -> DeviceRegistry {
    let registry = DeviceRegistry::new();
    registry.register_device(DeviceKind::Thermocouple(Thermocouple::new("tc1"))).await;
    registry
        .register_device(DeviceKind::PhotonicDetector(PhotonicDetector::new("pd1")))
        .await;
    registry
        .register_device(DeviceKind::Ln2CoolingController(Ln2CoolingController::new(
            "ln2-1",
            Arc::clone(&physics),
        )))
        .await;
    registry
        .register_device(DeviceKind::LaserController(LaserController::new("laser1")))
        .await;
    registry
        .register_device(DeviceKind::AncillaQubit(AncillaQubit::new("ancilla1")))
        .await;
    registry
        .register_device(DeviceKind::QuantumRegister(QuantumRegister::new("qreg1", 4)))
        .await;
    registry
        .register_device(DeviceKind::PulseSequencer(PulseSequencer::new("pulse1")))
        .await;
    registry.register_device(DeviceKind::QecModule(QecModule::new("qec1"))).await;
    registry
}

async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    cancel.cancel();
}

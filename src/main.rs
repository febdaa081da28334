//! Command line front end.
//!
//! Usage:
//!   zigbee-capability-bridge decode 00 05 01 01 00 01 01
//!   zigbee-capability-bridge encode --dp 2 --type value --value 215
//!   zigbee-capability-bridge simulate --manifest motion.json

use clap::{Parser, Subcommand};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use zigbee_capability_bridge::config::{self, Config};
use zigbee_capability_bridge::input::manifest::DeviceManifest;
use zigbee_capability_bridge::input::simulation::{
    RecordingSink, SimulatedCluster, run_zone_simulation,
};
use zigbee_capability_bridge::session::DeviceSession;
use zigbee_capability_bridge::tuya::{self, DataType, DatapointValue};
use zigbee_capability_bridge::zcl::{AttributeValue, ClusterHandle, IAS_ZONE, TUYA_DATAPOINTS};

#[derive(Parser)]
#[command(name = "zigbee-capability-bridge")]
#[command(about = "Zigbee capability binding and Tuya datapoint tooling")]
struct Cli {
    /// JSON config file; environment variables are used when absent
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a Tuya datapoint frame given as hex
    Decode {
        /// Frame bytes, whitespace allowed
        #[arg(num_args = 1.., required = true)]
        frame: Vec<String>,
    },
    /// Encode one datapoint into a Tuya frame
    Encode {
        #[arg(long)]
        dp: u8,
        /// raw, bool, value, string, enum or bitmap
        #[arg(long = "type")]
        data_type: String,
        /// Value; hex for raw
        #[arg(long)]
        value: String,
        #[arg(long, default_value_t = 0)]
        tid: u8,
    },
    /// Run a session for a manifest against simulated clusters until Ctrl+C
    Simulate {
        #[arg(long)]
        manifest: PathBuf,
        /// Seconds between simulated zone alarm toggles
        #[arg(long, default_value_t = 5)]
        period: u64,
    },
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn parse_value(data_type: DataType, value: &str) -> Result<DatapointValue, Box<dyn std::error::Error>> {
    Ok(match data_type {
        DataType::Raw => DatapointValue::Raw(hex::decode(value)?),
        DataType::Bool => DatapointValue::Bool(matches!(value, "true" | "1" | "on")),
        DataType::Value => DatapointValue::Value(value.parse()?),
        DataType::String => DatapointValue::String(value.to_string()),
        DataType::Enum => DatapointValue::Enum(value.parse()?),
        DataType::Bitmap => DatapointValue::Bitmap(value.parse()?),
    })
}

fn load_config(path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    })
}

async fn simulate(
    config: Config,
    manifest_path: PathBuf,
    period: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = DeviceManifest::from_json_str(&std::fs::read_to_string(&manifest_path)?)?;
    let bindings = manifest.bindings(&config)?;
    let datapoints = manifest.datapoint_handlers(&config);

    let mut cluster_ids: BTreeSet<u16> = bindings.iter().map(|b| b.cluster_id).collect();
    if !datapoints.is_empty() {
        cluster_ids.insert(TUYA_DATAPOINTS);
    }
    let mut clusters: HashMap<u16, Arc<dyn ClusterHandle>> = HashMap::new();
    for id in cluster_ids {
        let cluster = SimulatedCluster::new(id);
        for binding in bindings.iter().filter(|b| b.cluster_id == id) {
            if let Some(attr) = &binding.get_attribute {
                cluster.set_attribute(attr.clone(), AttributeValue::Int(0));
            }
        }
        info!("[Sim] Cluster {} ready", config.clusters.name_of(id));
        clusters.insert(id, Arc::new(cluster));
    }

    let has_ias = clusters.contains_key(&IAS_ZONE);
    let session = DeviceSession::new(
        manifest.endpoint,
        clusters,
        Arc::new(RecordingSink::new()),
        Arc::new(config),
    );
    for binding in bindings {
        session.register(binding)?;
    }
    for (dp, handler) in datapoints {
        session.register_datapoint(dp, handler)?;
    }
    session.initialize().await?;

    let zone_task = has_ias
        .then(|| run_zone_simulation(session.event_sender(), Duration::from_secs(period.max(1))));

    info!("Session {} is {}", session.id(), session.state());
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some(task) = zone_task {
        task.abort();
    }
    session.teardown();
    for failure in session.errors().history() {
        warn!(
            "[Sim] {} {} {}: {}",
            failure.at.format("%H:%M:%S"),
            failure.severity,
            failure.context,
            failure.message
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file before the runtime spawns worker threads
    config::load_dotenv();
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { frame } => {
            let bytes = hex::decode(frame.concat())?;
            let frames = tuya::decode_all(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&frames)?);
        }
        Commands::Encode {
            dp,
            data_type,
            value,
            tid,
        } => {
            let data_type: DataType = serde_json::from_value(serde_json::Value::String(data_type))?;
            let value = parse_value(data_type, &value)?;
            let frame = tuya::encode(tid, dp, data_type, &value)?;
            println!("{}", hex::encode(frame));
        }
        Commands::Simulate { manifest, period } => {
            let config = load_config(cli.config)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(simulate(config, manifest, period))?;
        }
    }
    Ok(())
}

/**
 * MESHSCOPE - Analyse ponctuelle d'un réseau Zigbee
 *
 * RÔLE : Charge la config, se connecte au broker, capture un snapshot
 * (topologie, inventaire, états) puis imprime le rapport d'analyse JSON
 * sur stdout.
 *
 * UTILITÉ : Aucune commande n'est envoyée au réseau ; les propositions
 * de re-parentage sont seulement rapportées.
 */

use anyhow::{bail, Context, Result};
use meshscope_bridge::{load_config, mqtt, ProtocolClient, TelemetrySource};
use meshscope_core::{Command, MeshAnalyzer, MeshReport};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Output {
    report: MeshReport,
    proposed_commands: Vec<Command>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshscope=info")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config().await;
    info!(host = %config.mqtt.host, port = config.mqtt.port, base = %config.base_topic, "starting");

    let connection = mqtt::connect(&config);
    let source = TelemetrySource::new(ProtocolClient::new(connection.transport(), config.clone()));

    if !source.health_check().await.context("bridge health check")? {
        bail!("bridge reports itself unhealthy");
    }

    let snapshot = source.snapshot().await.context("capturing mesh snapshot")?;
    let analyzer = MeshAnalyzer::new(config.location_resolver(), config.distance_model());
    let report = analyzer.analyze(&snapshot).context("analyzing mesh")?;

    let commands = match Command::from_assignments(&snapshot, &report.routing.assignments) {
        Ok(commands) => commands,
        Err(e) => {
            warn!("could not build re-parent commands: {e}");
            Vec::new()
        }
    };

    info!(
        issues = report.diagnostics.issues.len(),
        anomalies = report.routing.anomalies.len(),
        "analysis complete"
    );
    let output = Output {
        report,
        proposed_commands: commands,
    };
    println!("{}", serde_json::to_string_pretty(&output).context("serializing report")?);
    Ok(())
}

//! xflow - inspect and exercise xflow scene documents
//!
//! `inspect` prints the channels every data node of a scene resolves to.
//! `touch` simulates an update of one input's data and reports which data
//! nodes were invalidated.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xflow_comms::create_notification_channel;
use xflow_graph::{Channel, Graph, SceneDocument, SceneGraph};

#[derive(Parser, Debug)]
#[command(name = "xflow")]
#[command(about = "Inspect and exercise xflow scene documents", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved channels of every data node
    Inspect {
        /// Scene file (.ron)
        scene: PathBuf,
    },
    /// Simulate a data update on an input and print the invalidated nodes
    Touch {
        /// Scene file (.ron)
        scene: PathBuf,

        /// Name of the input to update
        input: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xflow=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Inspect { scene } => inspect(&scene),
        Command::Touch { scene, input } => touch(&scene, &input),
    }
}

fn load_scene(path: &Path) -> Result<SceneGraph> {
    let document = SceneDocument::load(path)
        .with_context(|| format!("Failed to load scene {}", path.display()))?;
    tracing::info!("Loaded scene {:?} (version {})", document.name, document.version);

    document
        .to_graph()
        .with_context(|| format!("Failed to build graph from {}", path.display()))
}

fn inspect(path: &Path) -> Result<()> {
    let scene = load_scene(path)?;
    let graph = &scene.graph;

    println!("Scene: {}", path.display());
    println!("  {} nodes\n", graph.len());

    for (id, resolved) in graph.resolve_all() {
        let node = graph.data(id)?;
        println!(
            "Data node {} ({} children{}{})",
            id,
            node.children().len(),
            node.source_node()
                .map_or_else(String::new, |source| format!(", source {source}")),
            node.proto_node()
                .map_or_else(String::new, |proto| format!(", proto {proto}")),
        );
        match resolved {
            Ok(table) if table.is_empty() => println!("  (no channels)"),
            Ok(table) => {
                for (name, channel) in table.iter() {
                    println!("  {name:<16} {}", describe(graph, channel));
                }
            }
            Err(e) => println!("  error: {e}"),
        }
        println!();
    }

    Ok(())
}

fn describe(graph: &Graph, channel: &Channel) -> String {
    match channel {
        Channel::Input { node, seqnr, param } => {
            let data = graph
                .input(*node)
                .ok()
                .and_then(|input| input.data())
                .and_then(|buffer| buffer.snapshot())
                .map_or_else(
                    || "no data".to_string(),
                    |snapshot| format!("{:?} x{}", snapshot.data_type, snapshot.values.len()),
                );
            let kind = if *param { "param" } else { "input" };
            format!("{kind} {node} seqnr {seqnr}, {data}")
        }
        Channel::Compute {
            node,
            operator,
            output,
            inputs,
        } => {
            let bound: Vec<String> = inputs
                .iter()
                .map(|(name, channel)| match channel {
                    Some(channel) => format!("{name}<-{}", channel.node()),
                    None => format!("{name}<-?"),
                })
                .collect();
            format!("{operator}.{output} on {node} ({})", bound.join(", "))
        }
    }
}

fn touch(path: &Path, input_name: &str) -> Result<()> {
    let mut scene = load_scene(path)?;
    let Some(input) = scene.input_named(input_name) else {
        bail!("No input named {input_name:?} in {}", path.display());
    };

    let (request, rx) = create_notification_channel();
    for id in scene.graph.node_ids() {
        if scene.graph.data(id).is_ok() {
            scene.graph.add_request(id, Box::new(request.clone()))?;
        }
    }

    let buffer = scene.graph.input(input)?.data().cloned();
    match buffer {
        Some(buffer) => {
            let notified = scene.graph.buffer_changed(&*buffer);
            tracing::info!("Buffer update reached {} inputs", notified);
        }
        None => {
            // No buffer to update; re-assigning the empty slot is a data change too
            scene.graph.set_input_data(input, None)?;
        }
    }

    println!("Touched input {input_name:?} ({input})\n");
    println!("Notifications:");
    for notification in rx.try_iter() {
        println!("  {} {:?}", notification.node, notification.signal);
    }

    println!("\nDirty nodes:");
    for (id, modification) in scene.graph.flush() {
        println!("  {id} {modification:?}");
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tryon_core::catalog::{self, CatalogItem, ItemKind};
use tryon_core::{FaceShape, Region};
use tryon_hw::{Camera, CameraConstraints};

#[zbus::proxy(
    interface = "org.tryon.Studio1",
    default_service = "org.tryon.Studio1",
    default_path = "/org/tryon/Studio1"
)]
trait Studio {
    async fn set_makeup(&self, region: &str, color: &str, opacity: f64, blend: &str, soften: f64)
        -> zbus::Result<()>;
    async fn apply_shade(&self, id: &str, opacity: f64) -> zbus::Result<()>;
    async fn clear_makeup(&self, region: &str) -> zbus::Result<bool>;
    async fn select_accessory(&self, id: &str) -> zbus::Result<()>;
    async fn clear_accessory(&self) -> zbus::Result<bool>;
    async fn nudge(&self, dx: f64, dy: f64) -> zbus::Result<String>;
    async fn zoom(&self, delta: f64) -> zbus::Result<String>;
    async fn rotate(&self, degrees: f64) -> zbus::Result<String>;
    async fn reset_transform(&self) -> zbus::Result<String>;
    async fn set_accessory_color(&self, color: &str) -> zbus::Result<()>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn recommend(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "tryon", about = "Virtual makeup and hairstyle try-on CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Paint a makeup region (lips, eyes, blush, foundation)
    Makeup {
        region: String,
        /// Hex color, e.g. "#b3202a"; omit for the natural look
        #[arg(short, long)]
        color: Option<String>,
        #[arg(short, long, default_value_t = 0.6)]
        opacity: f64,
        /// Blend mode: normal, multiply or overlay
        #[arg(short, long, default_value = "multiply")]
        blend: String,
        /// Edge softening radius in pixels
        #[arg(short, long, default_value_t = 1.5)]
        soften: f64,
    },
    /// Apply a catalog shade by id
    Shade {
        id: String,
        #[arg(short, long, default_value_t = 0.6)]
        opacity: f64,
    },
    /// Remove makeup from a region
    Clear { region: String },
    /// Select a catalog accessory by id
    Accessory { id: String },
    /// Remove the selected accessory
    RemoveAccessory,
    /// Move the accessory by a pixel offset
    #[command(allow_negative_numbers = true)]
    Nudge { dx: f64, dy: f64 },
    /// Grow or shrink the accessory (e.g. 0.1 or -0.1)
    #[command(allow_negative_numbers = true)]
    Zoom { delta: f64 },
    /// Rotate the accessory by degrees
    #[command(allow_negative_numbers = true)]
    Rotate { degrees: f64 },
    /// Return the accessory to its computed placement
    Reset,
    /// Tint the accessory toward a hex color
    Color { hex: String },
    /// Save the current preview with overlays as PNG
    Capture,
    /// Show daemon status
    Status,
    /// Suggest catalog items for the detected face shape
    Recommend,
    /// List catalog items (no daemon needed)
    Catalog {
        /// Only accessories or only shades
        #[arg(short, long)]
        kind: Option<String>,
        /// Only shades for this region
        #[arg(short, long)]
        region: Option<String>,
        /// Only items suited to this face shape (oval, round, oblong)
        #[arg(short, long)]
        shape: Option<String>,
    },
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Write the captured frame to this PNG path
        #[arg(long)]
        save: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Catalog { kind, region, shape } => return list_catalog(kind, region, shape),
        Commands::Test { device, save } => return camera_test(&device, save.as_deref()),
        command => run_remote(command).await?,
    }

    Ok(())
}

async fn connect() -> Result<StudioProxy<'static>> {
    tracing::debug!("connecting to tryond on the session bus");
    let conn = zbus::connection::Builder::session()?
        .method_timeout(Duration::from_secs(10))
        .build()
        .await
        .context("cannot reach the session bus")?;
    StudioProxy::new(&conn).await.context("tryond is not running")
}

async fn run_remote(command: Commands) -> Result<()> {
    let studio = connect().await?;

    match command {
        Commands::Makeup {
            region,
            color,
            opacity,
            blend,
            soften,
        } => {
            let color = color.unwrap_or_default();
            studio.set_makeup(&region, &color, opacity, &blend, soften).await?;
            if color.is_empty() {
                println!("{region}: natural");
            } else {
                println!("{region}: {color} at {:.0}% ({blend})", opacity * 100.0);
            }
        }
        Commands::Shade { id, opacity } => {
            studio.apply_shade(&id, opacity).await?;
            println!("Applied {id}");
        }
        Commands::Clear { region } => {
            if studio.clear_makeup(&region).await? {
                println!("Cleared {region}");
            } else {
                println!("No makeup on {region}");
            }
        }
        Commands::Accessory { id } => {
            studio.select_accessory(&id).await?;
            println!("Selected {id}");
        }
        Commands::RemoveAccessory => {
            if studio.clear_accessory().await? {
                println!("Accessory removed");
            } else {
                println!("No accessory selected");
            }
        }
        Commands::Nudge { dx, dy } => print_transform(&studio.nudge(dx, dy).await?)?,
        Commands::Zoom { delta } => print_transform(&studio.zoom(delta).await?)?,
        Commands::Rotate { degrees } => print_transform(&studio.rotate(degrees).await?)?,
        Commands::Reset => print_transform(&studio.reset_transform().await?)?,
        Commands::Color { hex } => {
            studio.set_accessory_color(&hex).await?;
            println!("Accessory tinted {hex}");
        }
        Commands::Capture => {
            let path = studio.capture().await?;
            println!("Saved {path}");
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&studio.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Recommend => {
            let items: Vec<CatalogItem> = serde_json::from_str(&studio.recommend().await?)?;
            print_items(items.iter());
        }
        Commands::Catalog { .. } | Commands::Test { .. } => anyhow::bail!("not a daemon command"),
    }

    Ok(())
}

fn print_transform(json: &str) -> Result<()> {
    let t: serde_json::Value = serde_json::from_str(json)?;
    println!(
        "offset ({}, {})  scale {}  rotation {}°",
        t["translate_x"], t["translate_y"], t["scale"], t["rotate_degrees"]
    );
    Ok(())
}

fn print_items<'a>(items: impl Iterator<Item = &'a CatalogItem>) {
    for item in items {
        let detail = match item.kind {
            ItemKind::Accessory => item.image_asset.clone().unwrap_or_default(),
            ItemKind::Shade => format!(
                "{} {}",
                item.region.map(|r| r.to_string()).unwrap_or_default(),
                item.color.map(|c| c.to_hex()).unwrap_or_default()
            ),
        };
        println!("{:<24} {:<28} {detail}", item.id, item.name);
    }
}

fn list_catalog(kind: Option<String>, region: Option<String>, shape: Option<String>) -> Result<()> {
    let region = region.map(|r| r.parse::<Region>()).transpose().map_err(anyhow::Error::msg)?;
    let shape = shape.map(|s| s.parse::<FaceShape>()).transpose().map_err(anyhow::Error::msg)?;
    let kind = match kind.as_deref() {
        None => None,
        Some("accessory" | "accessories") => Some(ItemKind::Accessory),
        Some("shade" | "shades") => Some(ItemKind::Shade),
        Some(other) => anyhow::bail!("unknown kind: {other}"),
    };

    let items = catalog::list_items().iter().filter(|item| {
        kind.map_or(true, |k| item.kind == k)
            && region.map_or(true, |r| item.region == Some(r))
            && shape.map_or(true, |s| item.suits(s))
    });
    print_items(items);
    Ok(())
}

fn camera_test(device: &str, save: Option<&str>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let camera = Camera::open(device, &CameraConstraints::default())?;
    println!(
        "Opened {}: {}x{} {:?}",
        camera.device_path,
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let frame = camera.capture_frame()?;
    println!(
        "Frame #{}: {}x{}, brightness {:.1}, dark: {}",
        frame.sequence,
        frame.width(),
        frame.height(),
        frame.avg_brightness(),
        frame.is_dark
    );

    if let Some(path) = save {
        frame.image.save(path).with_context(|| format!("failed to write {path}"))?;
        println!("Saved {path}");
    }

    Ok(())
}

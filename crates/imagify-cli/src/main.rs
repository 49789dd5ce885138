use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imagify_contracts::accounts::{CreditPlan, DEFAULT_STARTING_BALANCE};
use imagify_contracts::events::EventWriter;
use imagify_contracts::store::{JsonFileStore, DEFAULT_HISTORY_LIMIT};
use imagify_engine::collage;
use imagify_engine::{
    GenerateError, GenerateReply, GenerationEngine, GenerationOutcome, GenerationRequest,
    GeneratorConfig, ImageEdit, ProviderChain, ProviderConfig, Transforms,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "imagify", version, about = "Imagify image generation core")]
struct Cli {
    /// JSON document store holding accounts and artifacts.
    #[arg(long, global = true, default_value = "imagify-store.json")]
    store: PathBuf,
    /// Optional JSONL audit log of generation events.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = DEFAULT_STARTING_BALANCE)]
    starting_balance: i64,
    /// Refuse generation when the balance is zero or below.
    #[arg(long, global = true)]
    require_credits: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Collage(CollageArgs),
    History(HistoryArgs),
    Delete(DeleteArgs),
    Credits(OwnerArgs),
    ResetCredits(OwnerArgs),
    Purchase(PurchaseArgs),
    RemoveBackground(EditArgs),
    Upscale(EditArgs),
    Variation(EditArgs),
    EnhancePrompt(EnhanceArgs),
    ImageToPrompt(DescribeArgs),
    CheckConfig,
}

#[derive(Debug, Parser)]
struct OwnerArgs {
    #[arg(long)]
    owner: Option<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long, default_value = "")]
    prompt: String,
    /// Source image for a collage; repeatable, only the first four are used.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    /// Write the generated image here instead of inlining it in the reply.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    image: PathBuf,
    /// Write the edited image here instead of inlining it in the reply.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EnhanceArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    prompt: String,
}

#[derive(Debug, Parser)]
struct DescribeArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct CollageArgs {
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    limit: usize,
    /// Include the full image data URI of every entry.
    #[arg(long)]
    with_images: bool,
}

#[derive(Debug, Parser)]
struct DeleteArgs {
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    id: String,
}

#[derive(Debug, Parser)]
struct PurchaseArgs {
    #[arg(long)]
    owner: Option<String>,
    /// Basic, Advanced or Business.
    #[arg(long)]
    plan: CreditPlan,
}

fn main() {
    init_logging();
    match run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imagify error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    if let Command::Collage(args) = &cli.command {
        return run_collage(args);
    }

    let provider_config = ProviderConfig::from_env();
    let engine = build_engine(&cli, &provider_config);
    match cli.command {
        Command::CheckConfig => {
            print_json(&json!({
                "success": true,
                "providers": provider_config.status(),
                "generationOrder": engine.provider_names(),
                "transforms": engine.transform_names(),
            }))?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(&engine, args),
        Command::RemoveBackground(args) => run_edit(&engine, ImageEdit::RemoveBackground, args),
        Command::Upscale(args) => run_edit(&engine, ImageEdit::Upscale, args),
        Command::Variation(args) => run_edit(&engine, ImageEdit::Variation, args),
        Command::EnhancePrompt(args) => {
            let reply = match engine.enhance_prompt(&args.prompt, args.owner.as_deref()) {
                Ok(enhanced) => json!({ "success": true, "enhancedPrompt": enhanced }),
                Err(err) => json!({ "success": false, "message": err.user_message() }),
            };
            finish_reply(&reply)
        }
        Command::ImageToPrompt(args) => {
            let image = read_image(&args.image)?;
            let reply = match engine.image_to_prompt(&image, args.owner.as_deref()) {
                Ok(prompt) => json!({ "success": true, "prompt": prompt }),
                Err(err) => json!({ "success": false, "message": err.user_message() }),
            };
            finish_reply(&reply)
        }
        Command::History(args) => {
            let history = engine.history(args.owner.as_deref(), Some(args.limit))?;
            let mut rows = Vec::with_capacity(history.len());
            for artifact in &history {
                let mut row = serde_json::to_value(artifact)?;
                if !args.with_images {
                    if let Some(map) = row.as_object_mut() {
                        map.remove("image_data");
                    }
                }
                rows.push(row);
            }
            print_json(&json!({ "success": true, "history": rows }))?;
            Ok(0)
        }
        Command::Delete(args) => {
            engine.delete_artifact(args.owner.as_deref(), &args.id)?;
            print_json(&json!({ "success": true, "message": "Image deleted successfully" }))?;
            Ok(0)
        }
        Command::Credits(args) => {
            let credits = engine.credits(args.owner.as_deref())?;
            print_json(&json!({ "success": true, "credits": credits }))?;
            Ok(0)
        }
        Command::ResetCredits(args) => {
            let balance = engine.reset_credits(args.owner.as_deref())?;
            print_json(&json!({ "success": true, "creditBalance": balance }))?;
            Ok(0)
        }
        Command::Purchase(args) => {
            let balance = engine.purchase(args.owner.as_deref(), args.plan)?;
            print_json(&json!({
                "success": true,
                "message": format!("Added {} credits", args.plan.credits()),
                "creditBalance": balance,
            }))?;
            Ok(0)
        }
        Command::Collage(_) => Ok(0),
    }
}

fn build_engine(cli: &Cli, provider_config: &ProviderConfig) -> GenerationEngine {
    let chain = ProviderChain::from_config(provider_config);
    let store = JsonFileStore::new(&cli.store);
    info!(providers = ?chain.names(), store = %store.path().display(), "engine ready");
    let config = GeneratorConfig {
        starting_balance: cli.starting_balance,
        require_credits: cli.require_credits,
    };
    let engine = GenerationEngine::new(chain, Arc::new(store), config)
        .with_transforms(Transforms::from_config(provider_config));
    match cli.events.as_ref() {
        Some(path) => engine.with_events(EventWriter::new(path, "imagify")),
        None => engine,
    }
}

fn run_generate(engine: &GenerationEngine, args: GenerateArgs) -> Result<i32> {
    let images = read_images(&args.images)?;
    let request = GenerationRequest::new(args.prompt).with_images(images);
    let result = engine.generate(&request, args.owner.as_deref());
    print_image_reply(&result, args.out.as_deref())
}

fn run_edit(engine: &GenerationEngine, edit: ImageEdit, args: EditArgs) -> Result<i32> {
    let image = read_image(&args.image)?;
    let result = engine.edit_image(edit, &image, args.owner.as_deref());
    print_image_reply(&result, args.out.as_deref())
}

/// Prints the reply; with `out` the image goes to disk and the reply names the file.
fn print_image_reply(
    result: &Result<GenerationOutcome, GenerateError>,
    out: Option<&Path>,
) -> Result<i32> {
    let reply = GenerateReply::from_result(result);
    let mut payload = serde_json::to_value(&reply)?;

    if let (Ok(outcome), Some(out)) = (result, out) {
        write_file(out, &outcome.image)?;
        if let Some(map) = payload.as_object_mut() {
            map.remove("image");
            map.insert("output".to_string(), json!(out.display().to_string()));
        }
    }
    finish_reply(&payload)
}

/// Exit status follows the reply's `success` flag.
fn finish_reply(reply: &Value) -> Result<i32> {
    print_json(reply)?;
    Ok(if reply["success"].as_bool().unwrap_or(false) { 0 } else { 1 })
}

fn run_collage(args: &CollageArgs) -> Result<i32> {
    let images = read_images(&args.images)?;
    let bytes = collage::composite(&images).context("collage failed")?;
    write_file(&args.out, &bytes)?;
    let (cols, rows) = collage::grid_for(images.len());
    print_json(&json!({
        "success": true,
        "output": args.out.display().to_string(),
        "width": cols * collage::CELL_SIZE,
        "height": rows * collage::CELL_SIZE,
    }))?;
    Ok(0)
}

fn read_images(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    if paths.len() > collage::MAX_COLLAGE_IMAGES {
        warn!(
            count = paths.len(),
            "only the first {} images are used",
            collage::MAX_COLLAGE_IMAGES
        );
    }
    paths
        .iter()
        .map(|path| read_image(path))
        .collect()
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed reading {}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use imagify_contracts::accounts::CreditPlan;

    use super::{finish_reply, read_images, write_file, Cli, Command};

    #[test]
    fn parses_generate_with_images_and_global_flags() {
        let cli = Cli::try_parse_from([
            "imagify",
            "--store",
            "/tmp/store.json",
            "generate",
            "--owner",
            "user-1",
            "--prompt",
            "pets",
            "--image",
            "a.png",
            "--image",
            "b.png",
            "--require-credits",
        ])
        .expect("parse");
        assert_eq!(cli.store, PathBuf::from("/tmp/store.json"));
        assert!(cli.require_credits);
        assert_eq!(cli.starting_balance, 5);
        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.owner.as_deref(), Some("user-1"));
                assert_eq!(args.prompt, "pets");
                assert_eq!(args.images, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
                assert!(args.out.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_purchase_plan_and_rejects_unknown_plan() {
        let cli = Cli::try_parse_from(["imagify", "purchase", "--owner", "u", "--plan", "business"])
            .expect("parse");
        match cli.command {
            Command::Purchase(args) => assert_eq!(args.plan, CreditPlan::Business),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["imagify", "purchase", "--plan", "gold"]).is_err());
    }

    #[test]
    fn collage_requires_an_image() {
        assert!(Cli::try_parse_from(["imagify", "collage", "--out", "x.png"]).is_err());
        assert!(matches!(
            Cli::try_parse_from(["imagify", "check-config"]).map(|cli| cli.command),
            Ok(Command::CheckConfig)
        ));
    }

    #[test]
    fn read_images_reads_in_order_and_reports_missing_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("one.png");
        write_file(&path, b"bytes")?;
        assert_eq!(read_images(&[path.clone()])?, vec![b"bytes".to_vec()]);

        let second = temp.path().join("two.png");
        write_file(&second, b"other")?;
        let five = vec![path.clone(), second, path.clone(), path.clone(), path.clone()];
        let read = read_images(&five)?;
        assert_eq!(read.len(), 5);
        assert_eq!(read[1], b"other".to_vec());

        let missing = temp.path().join("missing.png");
        let err = read_images(&[missing]).expect_err("missing file");
        assert!(format!("{err:#}").contains("missing.png"));
        Ok(())
    }

    #[test]
    fn parses_transform_subcommands() {
        let cli = Cli::try_parse_from([
            "imagify", "upscale", "--owner", "u", "--image", "in.png", "--out", "big.png",
        ])
        .expect("parse");
        match cli.command {
            Command::Upscale(args) => {
                assert_eq!(args.image, PathBuf::from("in.png"));
                assert_eq!(args.out, Some(PathBuf::from("big.png")));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(matches!(
            Cli::try_parse_from(["imagify", "remove-background", "--image", "a.png"]).map(|cli| cli.command),
            Ok(Command::RemoveBackground(_))
        ));
        assert!(matches!(
            Cli::try_parse_from(["imagify", "enhance-prompt", "--prompt", "cat"]).map(|cli| cli.command),
            Ok(Command::EnhancePrompt(_))
        ));
        assert!(matches!(
            Cli::try_parse_from(["imagify", "image-to-prompt", "--image", "a.png"]).map(|cli| cli.command),
            Ok(Command::ImageToPrompt(_))
        ));
        assert!(Cli::try_parse_from(["imagify", "variation"]).is_err());
    }

    #[test]
    fn exit_status_follows_success_flag() -> anyhow::Result<()> {
        assert_eq!(finish_reply(&serde_json::json!({ "success": true }))?, 0);
        assert_eq!(finish_reply(&serde_json::json!({ "success": false, "message": "no" }))?, 1);
        assert_eq!(finish_reply(&serde_json::json!({}))?, 1);
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use wp_html_translator::config::RuntimeConfig;
use wp_html_translator::ir::TranslationRequest;
use wp_html_translator::models::OpenAiChatModel;
use wp_html_translator::pipeline::{init_default_config, TranslatorPipeline};
use wp_html_translator::server;
use wp_html_translator::store::open_store;

#[derive(Parser, Debug)]
#[command(name = "wp-html-translator")]
#[command(about = "Translate WordPress post HTML with a chat model, preserving markup", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Config file path (default: WPT_CONFIG, or search for wp-html-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the HTTP API
    #[arg(long)]
    serve: bool,

    /// Listen address for --serve (overrides config and WPT_LISTEN)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Input HTML file
    #[arg(value_name = "HTML")]
    input: Option<PathBuf>,

    /// Output HTML (default: <input_stem>.<target>.html)
    #[arg(short, long, value_name = "HTML")]
    output: Option<PathBuf>,

    /// Source language (e.g. Russian)
    #[arg(long)]
    source_lang: Option<String>,

    /// Target language (e.g. German)
    #[arg(long)]
    target_lang: Option<String>,

    /// Domain prefix to replace in links and image URLs
    #[arg(long)]
    old_domain: Option<String>,

    /// Replacement domain prefix
    #[arg(long)]
    new_domain: Option<String>,

    /// Currency code used in [convert] shortcodes of the source
    #[arg(long)]
    currency_from: Option<String>,

    /// Currency code to rewrite [convert] shortcodes to
    #[arg(long)]
    currency_to: Option<String>,

    /// Currency word placed after amounts
    #[arg(long)]
    currency_label: Option<String>,

    /// Drop [convert] shortcodes instead of rewriting them
    #[arg(long)]
    remove_convert_blocks: bool,

    /// Run the QA pass and write <output_stem>.qa.txt
    #[arg(long)]
    qa: bool,

    /// Ignore a stored result for the same request
    #[arg(long)]
    no_cache: bool,

    /// Print the cache key and exit without calling the model
    #[arg(long)]
    dry_run: bool,

    /// Chunks translated concurrently per batch
    #[arg(long)]
    batch_size: Option<usize>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wp_html_translator=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let mut cfg = RuntimeConfig::load(args.config.clone()).context("load config")?;
    if let Some(n) = args.batch_size {
        cfg.pipeline.batch_size = n.max(1);
    }
    if let Some(p) = cfg.config_path.as_ref() {
        tracing::info!(config = %p.display(), "loaded config");
    }

    if args.serve {
        let pipeline = build_pipeline(&cfg).await?;
        let listen = args.listen.clone().unwrap_or_else(|| cfg.listen.clone());
        return server::serve(pipeline, &listen).await;
    }

    let Some(input) = args.input.clone() else {
        let mut cmd = Args::command();
        cmd.print_help().context("print help")?;
        eprintln!(
            "\n\nUSAGE:\n  wp-html-translator post.html --source-lang Russian --target-lang German\n  wp-html-translator --serve\n\nTIPS:\n  - OPENAI_API_KEY is read from the environment or a .env file.\n  - Default config search: wp-html-translator.toml (upwards), or set WPT_CONFIG.\n"
        );
        return Ok(());
    };

    let html = std::fs::read_to_string(&input)
        .with_context(|| format!("read input: {}", input.display()))?;
    let req = TranslationRequest {
        source_html: html,
        source_lang: args.source_lang.clone().unwrap_or_default(),
        target_lang: args.target_lang.clone().unwrap_or_default(),
        old_domain: args.old_domain.clone().unwrap_or_default(),
        new_domain: args.new_domain.clone().unwrap_or_default(),
        currency_from: args.currency_from.clone().unwrap_or_default(),
        currency_to: args.currency_to.clone().unwrap_or_default(),
        currency_label: args.currency_label.clone().unwrap_or_default(),
        remove_shortcodes: args.remove_convert_blocks,
        run_qa: args.qa,
        use_cache: !args.no_cache,
    };

    let pipeline = build_pipeline(&cfg).await?;
    if args.dry_run {
        println!("{}", pipeline.dry_run(&req)?);
        return Ok(());
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_for(&input, &req.target_lang));
    let outcome = pipeline.translate(&req).await?;
    std::fs::write(&output, &outcome.html_out)
        .with_context(|| format!("write output: {}", output.display()))?;
    tracing::info!(
        output = %output.display(),
        key = %outcome.key,
        cached = outcome.cached,
        "wrote translation"
    );

    if let Some(report) = outcome.qa_report.as_deref() {
        let qa_path = sibling_with_suffix(&output, "qa.txt");
        std::fs::write(&qa_path, report)
            .with_context(|| format!("write qa report: {}", qa_path.display()))?;
        tracing::info!(path = %qa_path.display(), "wrote qa report");
    }
    if let Some(err) = outcome.qa_error.as_deref() {
        tracing::warn!(error = err, "qa did not complete");
    }
    Ok(())
}

async fn build_pipeline(cfg: &RuntimeConfig) -> anyhow::Result<Arc<TranslatorPipeline>> {
    let model = OpenAiChatModel::new(cfg.model.clone()).context("build model client")?;
    let store = open_store(&cfg.store).context("open store")?;

    let mut pipeline_cfg = cfg.pipeline.clone();
    if let Some(preferred) = cfg.prefer_translate.as_deref() {
        let fallback = cfg.pipeline.model_translate.as_str();
        pipeline_cfg.model_translate = model.resolve_model(preferred, fallback).await;
    }
    if let Some(preferred) = cfg.prefer_qa.as_deref() {
        let fallback = cfg.pipeline.model_qa.as_str();
        pipeline_cfg.model_qa = model.resolve_model(preferred, fallback).await;
    }

    tracing::info!(
        backend = store.backend_name(),
        translate = %pipeline_cfg.model_translate,
        qa = %pipeline_cfg.model_qa,
        "pipeline ready"
    );
    Ok(Arc::new(TranslatorPipeline::new(
        pipeline_cfg,
        Arc::new(model),
        store,
    )))
}

fn default_output_for(input: &Path, target_lang: &str) -> PathBuf {
    let tag: String = target_lang
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let tag = if tag.is_empty() { "translated".to_string() } else { tag };
    sibling_with_suffix(input, &format!("{tag}.html"))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    path.with_file_name(format!("{stem}.{suffix}"))
}

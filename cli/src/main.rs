use anyhow::Context;
use clap::Parser;
use colored::*;
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;

use fabler_core::{
    ConsoleSink, RunReport, SinkRef, Story, StoryConfig, StoryEventSink, StoryGenerator,
    StoryRequest, TogetherClient,
};

#[derive(Parser, Debug)]
#[command(
    name = "fabler",
    version,
    about = "Illustrated short stories from a single topic",
    override_usage = "fabler <topic> <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Two stories:                    fabler \"a lighthouse at dawn\"
  Three stories, saved images:    fabler \"a magical forest\" -n 3 --save-images ./stories
  From a config file:             fabler \"desert caravans\" --config fabler.json
  JSON lines output:              fabler \"tiny robots\" -o stories.jsonl
  Dry-run test:                   fabler \"a lighthouse at dawn\" --dry-run"
)]
pub struct Args {
    pub topic: String,

    #[arg(short = 'n', long,
        value_parser = clap::value_parser!(u32).range(1..=3),
        help = "Number of stories to generate (1-3)")]
    pub count: Option<u32>,

    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true, help = "Together AI API key")]
    pub api_key: Option<String>,

    #[arg(long, help = "JSON config file (camelCase keys, all optional)")]
    pub config: Option<String>,

    #[arg(long, help = "API base URL")]
    pub base_url: Option<String>,

    #[arg(long, help = "Chat model used for prompts and stories")]
    pub chat_model: Option<String>,

    #[arg(long, help = "Image model")]
    pub image_model: Option<String>,

    #[arg(short = 'o', long, help = "Append each story as a JSON line to this file")]
    pub output: Option<String>,

    #[arg(long, help = "Download generated images into this directory")]
    pub save_images: Option<String>,

    #[arg(short = 'v', long, default_value_t = false, help = "Debug logging")]
    pub verbose: bool,

    #[arg(long, help = "Show what would be generated without calling the API")]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);

    if args.dry_run {
        dry_run(&args);
        return;
    }

    print_banner();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => fail(&format!("[!] {:#}", e)),
    };

    let request = match StoryRequest::new(&args.topic, config.count) {
        Ok(request) => request,
        Err(e) => fail(&format!("[!] {}", e)),
    };

    let client = match TogetherClient::new(&config.base_url, &config.api_key) {
        Ok(client) => Arc::new(client),
        Err(e) => fail(&format!("[!] {}", e)),
    };

    let sink: SinkRef = ConsoleSink::new_ref();
    let generator = match StoryGenerator::from_config(&config, client.clone(), Arc::clone(&sink)) {
        Ok(generator) => generator,
        Err(e) => fail(&format!("[!] {}", e)),
    };

    print_run_config(&request, &config);
    let report = generator.run(&request).await;

    if let Some(ref path) = config.output {
        if let Err(e) = append_stories(path, &report.stories) {
            sink.on_log("error", &format!("[!] {:#}", e));
        }
    }

    if let Some(ref dir) = config.save_images {
        save_images(&client, dir, &report.stories, &sink).await;
    }

    if !print_summary(&report) {
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "warn,fabler=debug,fabler_core=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn fail(message: &str) -> ! {
    eprint!("{}\r\n", message.red());
    process::exit(1);
}

/// Same inputs as a real run, minus the API key and anything remote.
fn dry_run(args: &Args) {
    let config = match layer_config(args) {
        Ok(config) => config,
        Err(e) => fail(&format!("[!] {:#}", e)),
    };
    let request = match StoryRequest::new(&args.topic, config.count) {
        Ok(request) => request,
        Err(e) => fail(&format!("[!] {}", e)),
    };
    println!("[DRY RUN] Would generate {} stories about: {}", request.count, request.topic);
}

fn build_config(args: &Args) -> anyhow::Result<StoryConfig> {
    let config = layer_config(args)?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Defaults, then the config file, then command-line flags.
fn layer_config(args: &Args) -> anyhow::Result<StoryConfig> {
    let mut config = match args.config {
        Some(ref path) => StoryConfig::load(path)?,
        None => StoryConfig::default(),
    };

    if let Some(ref key) = args.api_key {
        config.api_key = key.clone();
    }
    if let Some(ref url) = args.base_url {
        config.base_url = url.clone();
    }
    if let Some(ref model) = args.chat_model {
        config.chat_model = model.clone();
    }
    if let Some(ref model) = args.image_model {
        config.image_model = model.clone();
    }
    if let Some(count) = args.count {
        config.count = count;
    }
    if args.output.is_some() {
        config.output = args.output.clone();
    }
    if args.save_images.is_some() {
        config.save_images = args.save_images.clone();
    }
    Ok(config)
}

fn append_stories(path: &str, stories: &[Story]) -> anyhow::Result<()> {
    debug!("appending {} story(ies) to {}", stories.len(), path);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open output file '{}'", path))?;

    for story in stories {
        let line = serde_json::to_string(story)?;
        writeln!(file, "{}", line).with_context(|| format!("failed to write '{}'", path))?;
    }
    Ok(())
}

/// Image download problems never fail the run; the URL is still printed.
async fn save_images(client: &TogetherClient, dir: &str, stories: &[Story], sink: &SinkRef) {
    if let Err(e) = fs::create_dir_all(dir) {
        sink.on_log("error", &format!("[!] Cannot create '{}': {}", dir, e));
        return;
    }

    for story in stories {
        let path = Path::new(dir).join(format!("story_{}.png", story.index));
        let result = match client.download(&story.image_url).await {
            Ok(bytes) => fs::write(&path, bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => sink.on_log("success", &format!("[+] Saved {}", path.display())),
            Err(e) => sink.on_log(
                "warn",
                &format!("[!] Unable to save image {}: {} (URL: {})", story.index, e, story.image_url),
            ),
        }
    }
}

fn print_banner() {
    print!("{}\r\n", "  ~ fabler ~  illustrated stories from a single topic".bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

fn print_run_config(request: &StoryRequest, config: &StoryConfig) {
    print!("{}\r\n", format!("[+] Topic:       {}", request.topic).green().bold());
    print!("{}\r\n", format!("[+] Stories:     {}", request.count).blue());
    print!("{}\r\n", format!("[+] Chat model:  {}", config.chat_model).blue());
    print!("{}\r\n", format!("[+] Image model: {}", config.image_model).blue());
    print!("{}\r\n", format!("[+] Pacing:      {}s min, {} attempt(s)", config.min_delay, config.max_retries).magenta());
    if let Some(ref output) = config.output {
        print!("{}\r\n", format!("[+] Output:      {}", output).yellow());
    }
    if let Some(ref dir) = config.save_images {
        print!("{}\r\n", format!("[+] Images:      {}", dir).yellow());
    }
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}

/// Returns false when nothing was generated.
fn print_summary(report: &RunReport) -> bool {
    if report.stories.is_empty() {
        print!("{}\r\n", "[!] No stories were generated. Please try again.".yellow());
        print!("\r\nTroubleshooting tips:\r\n");
        print!("  1. Check that your Together AI API key is valid\r\n");
        print!("  2. Wait a few minutes if you've hit rate limits\r\n");
        print!("  3. Try generating fewer stories if the issue persists\r\n");
        std::io::stdout().flush().ok();
        return false;
    }

    let mut line = format!("[+] {} story(ies) generated", report.stories.len());
    if !report.failures.is_empty() {
        let failed: Vec<String> = report.failures.iter().map(|f| f.index.to_string()).collect();
        line.push_str(&format!(", failed: {}", failed.join(", ")));
    }
    print!("{}\r\n", line.green().bold());
    std::io::stdout().flush().ok();
    true
}

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kansei_design_proxy::credentials::CredentialLoader;
use kansei_design_proxy::llm::TextGenerator;
use kansei_design_proxy::pipeline::{GenerationRequest, PromptStage, SketchUpload};
use kansei_design_proxy::prompt::builder::{build_instruction, refine_for_target};
use kansei_design_proxy::vocabulary::{parse_selection, KANSEI_WORDS, TONES};
use kansei_design_proxy::{Config, DesignPipeline, GeminiClient, ImageBackend, MediaStore};

#[derive(Parser, Debug)]
#[command(name = "kanseictl", about = "Interactive CLI for Kansei fashion design generation", version)]
struct Cli {
    /// Override GEMINI_MODEL
    #[arg(global = true, long)]
    model: Option<String>,

    /// Override COMFYUI_URL
    #[arg(global = true, long)]
    comfyui_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the available tones and Kansei words
    Tones,
    /// Choose tones and Kansei words, then create an image prompt with Gemini
    Prompt {
        /// Where to save the final prompt when confirmed
        #[arg(long, value_name = "PATH", default_value = "last_image_prompt.txt")]
        output: PathBuf,
    },
    /// Generate a design from a local sketch
    Design {
        /// Sketch image; asked for interactively when omitted
        sketch: Option<PathBuf>,
        /// Maximum number of tones to pick
        #[arg(long, default_value_t = 3)]
        max_tones: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load env and parse CLI
    Config::dotenv_load();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();
    let cli = Cli::parse();

    let mut conf = Config::new()?;
    if let Some(model) = cli.model {
        conf.gemini_model = model;
    }
    if let Some(url) = cli.comfyui_url {
        conf.comfyui_url = url;
    }

    match cli.command {
        Commands::Tones => {
            print_numbered("Available Tones:", TONES);
            print_numbered("Available Kansei words:", KANSEI_WORDS);
            Ok(())
        }
        Commands::Prompt { output } => create_prompt(&conf, &output).await,
        Commands::Design { sketch, max_tones } => generate_design(&conf, sketch, max_tones).await,
    }
}

async fn create_prompt(conf: &Config, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Fashion CAD Prompt Creator - choose tones and Kansei words");
    let tones = pick_from_list("Available Tones:", TONES, None)?;
    let kansei = pick_from_list("Available Kansei words:", KANSEI_WORDS, None)?;

    let instruction = build_instruction(&tones, &kansei);
    println!("\n--- Instruction sent to Gemini ---\n");
    println!("{}", instruction);

    if !confirm("Call Gemini to generate image prompt now? (y/N): ", false)? {
        println!("Cancelled Gemini call - instruction printed above.");
        return Ok(());
    }

    println!("Calling Gemini... this requires GEMINI_API_KEY or API_KEY in the environment or {}", conf.env_file.display());
    let gemini = gemini_client(conf);
    let model_text = match gemini.generate_text(&instruction, &conf.gemini_model).await {
        Ok(text) => text,
        Err(e) => {
            eprintln!("{}", e.diagnostic());
            std::process::exit(1);
        }
    };
    println!("\n--- Gemini Output ---\n");
    println!("{}", model_text);

    let image_prompt = refine_for_target(&model_text);
    println!("\n--- Final Image Prompt (for image model) ---\n");
    println!("{}", image_prompt);

    if confirm(&format!("Save the final image prompt to '{}'? (Y/n): ", output.display()), true)? {
        tokio::fs::write(output, &image_prompt).await?;
        println!("Saved to {}", output.display());
    }
    Ok(())
}

async fn generate_design(conf: &Config, sketch: Option<PathBuf>, max_tones: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(60));
    println!("Fashion Design Generator - CLI Version");
    println!("{}", "=".repeat(60));

    let sketch_path = match sketch {
        Some(path) => path,
        None => PathBuf::from(read_line("\nEnter path to your sketch image: ")?),
    };
    if !sketch_path.is_file() {
        eprintln!("Error: Sketch file not found at {}", sketch_path.display());
        std::process::exit(1);
    }
    println!("\nUsing sketch: {}", sketch_path.display());

    let tones = pick_from_list(&format!("Available Tones (select up to {}):", max_tones), TONES, Some(max_tones))?;
    let kansei = pick_from_list("Available Kansei words (select any):", KANSEI_WORDS, None)?;
    if tones.is_empty() && kansei.is_empty() {
        eprintln!("\nError: Please select at least one tone or Kansei word.");
        std::process::exit(1);
    }
    println!("\nSelected tones: {}", joined_or_none(&tones));
    println!("Selected Kansei words: {}", joined_or_none(&kansei));

    let store = MediaStore::new(conf.media_dir.clone());
    store.ensure_dirs().await?;
    let images = ImageBackend::detect(conf).await;
    if let ImageBackend::Unavailable(reason) = &images {
        println!("\nImage generation unavailable ({}); the sketch will be copied instead.", reason);
    }
    let pipeline = DesignPipeline::new(Arc::new(gemini_client(conf)), images, store, conf.gemini_model.clone());

    println!("\nGenerating prompt with Gemini...");
    let prompt = match pipeline.compose_prompt(&tones, &kansei).await {
        PromptStage::Ready(text) => text,
        PromptStage::Degraded { diagnostic, .. } => {
            eprintln!("\nError generating prompt: {}", diagnostic);
            std::process::exit(1);
        }
    };
    println!("\n--- Generated Prompt ---\n{}\n", prompt);

    println!("Rendering the design. This may take a few minutes...");
    let request = GenerationRequest {
        sketch: SketchUpload::from_path(&sketch_path).await?,
        kansei_text: format!("{} {}", tones.join(" "), kansei.join(" ")).trim().to_string(),
        style_profile: None,
        tones: tones.clone(),
        kansei_words: kansei.clone(),
    };
    let outcome = pipeline.run_with_prompt(request, PromptStage::Ready(prompt.clone())).await?;

    let sidecar = outcome.artifact.path.with_extension("txt");
    let body = format!(
        "Tones: {}\nKansei Words: {}\n\nGenerated Prompt:\n{}",
        tones.join(", "),
        kansei.join(", "),
        prompt
    );
    tokio::fs::write(&sidecar, body).await?;

    match outcome.image_source.label() {
        "generated" => println!("Success! Generated image saved to:\n  {}", outcome.artifact.path.display()),
        _ => println!("Image generation did not run; the sketch was copied to:\n  {}", outcome.artifact.path.display()),
    }
    println!("Prompt saved to:\n  {}", sidecar.display());
    Ok(())
}

fn gemini_client(conf: &Config) -> GeminiClient {
    GeminiClient::new(conf.gemini_base_url.clone(), CredentialLoader::new(conf.env_file.clone()))
}

fn print_numbered(title: &str, options: &[&str]) {
    println!("\n{}", title);
    for (i, opt) in options.iter().enumerate() {
        println!("  {}. {}", i + 1, opt);
    }
}

/// Ask until the input parses; Enter selects nothing.
fn pick_from_list(title: &str, options: &[&str], max: Option<usize>) -> io::Result<Vec<String>> {
    print_numbered(title, options);
    let question = match max {
        Some(max) => format!("Select comma-separated numbers (max {}, or press Enter to skip): ", max),
        None => "Select comma-separated numbers (or press Enter to skip): ".to_string(),
    };
    loop {
        let raw = read_line(&question)?;
        match parse_selection(&raw, options, max) {
            Ok(picked) => return Ok(picked),
            Err(e) => println!("{} Try again.", e),
        }
    }
}

fn confirm(question: &str, default: bool) -> io::Result<bool> {
    let answer = read_line(question)?.to_lowercase();
    Ok(match answer.as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}

fn read_line(question: &str) -> io::Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
    }
    Ok(line.trim().to_string())
}

fn joined_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

use clap::{Parser, Subcommand, ValueEnum};
use photo_enhancer::{config, output, service::Service};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Png,
    Jpeg,
}

impl FormatArg {
    fn as_str(self) -> &'static str {
        match self {
            FormatArg::Png => "png",
            FormatArg::Jpeg => "jpeg",
        }
    }
}

/// Stage toggles for the `enhance` command.
#[derive(clap::Args, Clone)]
struct StageArgs {
    /// Unsharp-mask sharpening
    #[arg(long)]
    sharpen: bool,

    /// Non-local means denoising
    #[arg(long)]
    denoise: bool,

    /// Luminance-only adaptive equalization
    #[arg(long)]
    color_correction: bool,

    /// 2x cubic upscaling
    #[arg(long)]
    super_resolution: bool,

    /// Smooth detected face regions
    #[arg(long)]
    beautify: bool,

    /// Output encoding
    #[arg(long, value_enum, default_value = "png")]
    format: FormatArg,

    /// JPEG quality (1-100); invalid values fall back to the configured default
    #[arg(long, allow_negative_numbers = true)]
    quality: Option<i64>,

    /// Raw options JSON, as a client would send it; overrides the flags above
    #[arg(long, value_name = "JSON")]
    options: Option<String>,
}

impl StageArgs {
    fn options_json(&self) -> String {
        if let Some(json) = &self.options {
            return json.clone();
        }
        let mut value = serde_json::json!({
            "sharpen": self.sharpen,
            "denoise": self.denoise,
            "colorCorrection": self.color_correction,
            "superResolution": self.super_resolution,
            "beautify": self.beautify,
            "outputFormat": self.format.as_str(),
        });
        if let Some(q) = self.quality {
            value["jpegQuality"] = q.into();
        }
        value.to_string()
    }
}

#[derive(Parser)]
#[command(name = "photo-enhancer")]
#[command(about = "Enhance a single photograph")]
#[command(long_about = "\
Enhance a single photograph

Stages run in a fixed order; each is enabled by its flag:

  sharpen → denoise → color correction → super-resolution → beautify

Every run gets its own request directory under the storage root:

  uploads/
  └── <request-id>/
      └── processed.png | processed.jpg

Fetch the result later with 'photo-enhancer fetch <request-id>'.
Run 'photo-enhancer gen-config' to generate a documented config.toml.")]
#[command(version = env!("PHOTO_ENHANCER_BUILD"))]
struct Cli {
    /// Configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root for request directories (overrides service.storage_dir)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline on an image file
    Enhance {
        /// Image to enhance
        input: PathBuf,

        #[command(flatten)]
        stages: StageArgs,
    },
    /// Copy a finished artifact out of storage
    Fetch {
        /// Request id printed by `enhance`
        id: String,

        /// Artifact encoding
        #[arg(long, value_enum, default_value = "png")]
        format: FormatArg,

        /// Destination file (defaults to the artifact name)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "photo_enhancer=debug"
    } else {
        "photo_enhancer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let load = || -> Result<config::EnhanceConfig, config::ConfigError> {
        let mut config = config::load_config(cli.config.as_deref())?;
        if let Some(dir) = &cli.storage_dir {
            config.service.storage_dir = dir.clone();
        }
        Ok(config)
    };

    match &cli.command {
        Command::Enhance { input, stages } => {
            let bytes = std::fs::read(input)?;
            let service = Service::from_config(load()?)?;
            let response = service.upload(&bytes, &stages.options_json())?;
            output::print_upload(&response);
        }
        Command::Fetch { id, format, out } => {
            let service = Service::from_config(load()?)?;
            let artifact = service.processed(id, Some(format.as_str()))?;
            let dest = out
                .clone()
                .unwrap_or_else(|| PathBuf::from(&artifact.filename));
            std::fs::write(&dest, &artifact.bytes)?;
            output::print_fetch(&artifact, &dest);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

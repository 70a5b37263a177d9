use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use sonoportrait_appcore::service::AppService;
use sonoportrait_core::config::EnhancementVariant;
use sonoportrait_core::types::{ApiKey, Ethnicity};

/// Turns an ultrasound scan into a newborn portrait in two Stability stages.
#[derive(Parser, Debug)]
#[command(name = "sonoportrait-cli", version)]
struct Args {
    /// Ultrasound image to upload.
    image: PathBuf,
    #[arg(long, value_parser = parse_ethnicity)]
    ethnicity: Option<Ethnicity>,
    /// Stage 1 image strength.
    #[arg(long)]
    strength: Option<f32>,
    /// Stage 2 control strength.
    #[arg(long)]
    control_strength: Option<f32>,
    /// Enhancement applied before upload.
    #[arg(long, value_parser = parse_variant)]
    variant: Option<EnhancementVariant>,
    #[arg(long, env = "SONOPORTRAIT_CONFIG", default_value = "data/config.json")]
    config: PathBuf,
}

fn parse_ethnicity(v: &str) -> Result<Ethnicity, String> {
    Ethnicity::parse(v).ok_or_else(|| {
        let known: Vec<_> = Ethnicity::ALL.iter().map(|e| e.display_name()).collect();
        format!("unknown ethnicity {v:?} (one of: {})", known.join(", "))
    })
}

fn parse_variant(v: &str) -> Result<EnhancementVariant, String> {
    EnhancementVariant::parse(v).ok_or_else(|| {
        let known: Vec<_> = EnhancementVariant::ALL.iter().map(|e| e.label()).collect();
        format!("unknown variant {v:?} (one of: {})", known.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // The key lives only as long as this process.
    let api_key = ApiKey::new(std::env::var("STABILITY_API_KEY").unwrap_or_default());
    if api_key.is_blank() {
        bail!("STABILITY_API_KEY is not set");
    }

    let svc = AppService::new(args.config.clone());
    let cfg = svc.load_config()?;

    svc.validate_api_key(&api_key)
        .await
        .context("API key check failed")?;

    let upload = std::fs::read(&args.image)
        .with_context(|| format!("read image: {}", args.image.display()))?;

    let mut outline = cfg.generation.outline_params();
    let mut structure = cfg.generation.structure_params();
    if let Some(e) = args.ethnicity {
        outline = outline.with_ethnicity(e);
        structure = structure.with_ethnicity(e);
    }
    if let Some(s) = args.strength {
        outline = outline.with_strength(s);
    }
    if let Some(s) = args.control_strength {
        structure = structure.with_strength(s);
    }

    let session_id = svc.start_session(api_key)?;
    println!("session {session_id}");

    let stage1 = svc.submit_stage1(&upload, args.variant, outline).await?;
    println!(
        "stage 1 done: {} bytes (seed {})",
        stage1.output_image.len(),
        stage1.raw_response.seed.as_deref().unwrap_or("-")
    );

    let stage2 = svc.submit_stage2(structure).await?;
    println!(
        "stage 2 done: {} bytes (seed {})",
        stage2.output_image.len(),
        stage2.raw_response.seed.as_deref().unwrap_or("-")
    );

    let saved = svc.save_result()?;
    println!("saved {}", saved.display());

    svc.end_session();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_options() {
        let args = Args::try_parse_from([
            "sonoportrait-cli",
            "scan.png",
            "--ethnicity",
            "south-asian",
            "--strength",
            "0.5",
            "--control-strength",
            "0.9",
            "--variant",
            "face_roi",
            "--config",
            "cfg.json",
        ])
        .unwrap();
        assert_eq!(args.image, PathBuf::from("scan.png"));
        assert_eq!(args.ethnicity, Some(Ethnicity::SouthAsian));
        assert_eq!(args.strength, Some(0.5));
        assert_eq!(args.control_strength, Some(0.9));
        assert_eq!(args.variant, Some(EnhancementVariant::FaceRoi));
        assert_eq!(args.config, PathBuf::from("cfg.json"));
    }

    #[test]
    fn optional_flags_default_to_none() {
        let args = Args::try_parse_from(["sonoportrait-cli", "scan.png"]).unwrap();
        assert!(args.ethnicity.is_none());
        assert!(args.strength.is_none());
        assert!(args.variant.is_none());
    }

    #[test]
    fn rejects_bad_input() {
        let bad: [&[&str]; 6] = [
            &[],
            &["a.png", "b.png"],
            &["a.png", "--strength"],
            &["a.png", "--strength", "lots"],
            &["a.png", "--ethnicity", "martian"],
            &["a.png", "--frobnicate"],
        ];
        for rest in bad {
            let argv = std::iter::once("sonoportrait-cli").chain(rest.iter().copied());
            assert!(Args::try_parse_from(argv).is_err(), "{rest:?}");
        }
    }

    #[test]
    fn unknown_variant_lists_known_names() {
        let err = parse_variant("sepia").unwrap_err();
        assert!(err.contains("face_roi"));
    }
}

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use instructive_lib::config::{default_log_filter, AlignmentConfig};
use instructive_lib::models::MaterialText;
use instructive_lib::pipeline::extraction::{
    collect_paths, collect_selection, merge_materials, DocumentExtractor, OllamaVisionOcr, PdfiumBackend,
};
use instructive_lib::pipeline::llm::{LlmClient, OllamaClient};
use instructive_lib::pipeline::normalize::{load_competencies, load_students, load_students_by_names, parse_iep_text};
use instructive_lib::pipeline::{AlignmentPayload, AlignmentPipeline};

mod cli;

use cli::{Cli, Commands, GlobalFlags, MaterialArgs};

fn main() {
    if let Err(error) = run() {
        eprintln!("instructive error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.global.verbose {
        "instructive_lib=debug,instructive=debug,warn"
    } else {
        default_log_filter()
    };
    instructive_lib::init_tracing(filter);

    let config = cli.global.resolve_config()?;
    let extractor = build_extractor(&config, &cli.global)?;

    match cli.command {
        Commands::Students(args) => {
            let students = if args.names.is_empty() {
                load_students(&args.students, &extractor)
            } else {
                load_students_by_names(&args.students, &args.names, &extractor)
            }
            .with_context(|| format!("failed to read students from {}", args.students.display()))?;
            let materials = gather_materials(&args.materials, &extractor)?;

            let pipeline = AlignmentPipeline::new(connect(&config)?, extractor, config);
            let payload = pipeline.run_students(&students, &materials)?;
            finish(&payload, &args.out)
        }
        Commands::Competencies(args) => {
            let mut config = config;
            if args.grade_band.is_some() {
                config.grade_band = args.grade_band.clone();
            }
            let competencies = load_competencies(&args.directives, config.grade_band.as_deref());
            let materials = gather_materials(&args.materials, &extractor)?;

            let pipeline = AlignmentPipeline::new(connect(&config)?, extractor, config);
            let payload = pipeline.run_competencies(&competencies, &materials)?;
            finish(&payload, &args.out)
        }
        Commands::ParseIep { file, out } => {
            let text = extractor.extract_text(&file);
            let form = parse_iep_text(&text);
            if form.is_blank() {
                bail!("no IEP fields found in {}", file.display());
            }
            let json = serde_json::to_string_pretty(&form.to_json())?;
            match out {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{json}"),
            }
            Ok(())
        }
        Commands::Extract { file } => {
            let extraction = extractor
                .extract(&file)
                .with_context(|| format!("failed to extract {}", file.display()))?;
            tracing::info!(
                method = ?extraction.method,
                pages = extraction.page_count,
                ocr_pages = extraction.ocr_pages,
                "Extraction finished"
            );
            println!("{}", extraction.text);
            Ok(())
        }
    }
}

/// PDFium for text layers and rendering when the library can be found; a
/// vision model and/or Tesseract for OCR when configured.
fn build_extractor(config: &AlignmentConfig, flags: &GlobalFlags) -> anyhow::Result<DocumentExtractor> {
    let mut extractor = DocumentExtractor::new(config.extraction.clone());

    match PdfiumBackend::new() {
        Ok(_) => {
            extractor = extractor
                .with_text_layer(Box::new(PdfiumBackend))
                .with_pdf_renderer(Box::new(PdfiumBackend));
        }
        Err(e) => tracing::warn!(error = %e, "PDF support unavailable; PDFs will extract as empty text"),
    }

    if let Some(vision_model) = &config.model.vision_model {
        let client = OllamaClient::new(&config.model.ollama_url, config.sampling.call_timeout_secs)?;
        extractor = extractor.with_ocr_engine(Box::new(OllamaVisionOcr::new(
            Arc::new(client),
            vision_model.clone(),
        )));
    } else if let Some(tessdata) = &flags.tessdata {
        extractor = with_tesseract(extractor, tessdata)?;
    }

    Ok(extractor)
}

#[cfg(feature = "ocr")]
fn with_tesseract(extractor: DocumentExtractor, tessdata: &Path) -> anyhow::Result<DocumentExtractor> {
    let engine = instructive_lib::pipeline::extraction::TesseractOcr::new(tessdata)
        .with_context(|| format!("failed to initialize Tesseract from {}", tessdata.display()))?;
    Ok(extractor.with_ocr_engine(Box::new(engine)))
}

#[cfg(not(feature = "ocr"))]
fn with_tesseract(extractor: DocumentExtractor, tessdata: &Path) -> anyhow::Result<DocumentExtractor> {
    tracing::warn!(
        tessdata = %tessdata.display(),
        "Built without the `ocr` feature; ignoring --tessdata"
    );
    Ok(extractor)
}

fn gather_materials(args: &MaterialArgs, extractor: &DocumentExtractor) -> anyhow::Result<Vec<MaterialText>> {
    if args.is_empty() {
        bail!("no materials given (use --materials or --curriculum with --unit)");
    }
    let mut materials = collect_paths(&args.materials, extractor);
    if let Some(root) = &args.curriculum {
        materials.extend(collect_selection(root, &args.selection()?, extractor));
    }
    Ok(merge_materials(materials))
}

/// Connect to Ollama and fail early when it is unreachable.
fn connect(config: &AlignmentConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let client = OllamaClient::new(&config.model.ollama_url, config.sampling.call_timeout_secs)?;
    let available = client
        .is_model_available(&config.model.model_name)
        .with_context(|| format!("Ollama is not reachable at {}", client.base_url()))?;
    if !available {
        tracing::warn!(model = %config.model.model_name, "Model not found in Ollama; calls will likely fail");
    }
    Ok(Arc::new(client))
}

fn finish<T: serde::Serialize>(payload: &AlignmentPayload<T>, out: &Path) -> anyhow::Result<()> {
    payload
        .write(out)
        .with_context(|| format!("failed to write payload to {}", out.display()))?;
    println!(
        "{} entities x {} materials -> {}",
        payload.meta.entities.len(),
        payload.meta.materials.len(),
        out.display()
    );
    Ok(())
}

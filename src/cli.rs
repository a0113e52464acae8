use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use instructive_lib::config::AlignmentConfig;

/// Top-level CLI parser for the `instructive` binary.
#[derive(Debug, Parser)]
#[command(name = "instructive", version, about = "Score worksheet alignment against IEPs and curriculum competencies")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalFlags,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Score every (student, material) pair.
    Students(StudentsArgs),
    /// Score every material against curriculum competencies.
    Competencies(CompetenciesArgs),
    /// Convert an IEP form (PDF or text) into a student JSON record.
    ParseIep {
        file: PathBuf,
        /// Write JSON here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print the extracted text of one document.
    Extract { file: PathBuf },
}

/// Where the materials come from: plain paths, or a course/unit selection
/// below a curriculum root.
#[derive(Debug, Args)]
pub struct MaterialArgs {
    /// Material files or directories (sub-directories become units).
    #[arg(short, long = "materials", num_args = 1..)]
    pub materials: Vec<PathBuf>,

    /// Curriculum root used with --unit.
    #[arg(long, requires = "units")]
    pub curriculum: Option<PathBuf>,

    /// Unit selection as COURSE/UNIT, repeatable.
    #[arg(long = "unit", requires = "curriculum")]
    pub units: Vec<String>,
}

impl MaterialArgs {
    /// Group `COURSE/UNIT` selections by course, in first-seen order.
    pub fn selection(&self) -> anyhow::Result<Vec<(String, Vec<String>)>> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for raw in &self.units {
            let Some((course, unit)) = raw.split_once('/') else {
                bail!("--unit expects COURSE/UNIT, got '{raw}'");
            };
            let (course, unit) = (course.trim(), unit.trim());
            if course.is_empty() || unit.is_empty() {
                bail!("--unit expects COURSE/UNIT, got '{raw}'");
            }
            match grouped.iter_mut().find(|(c, _)| c == course) {
                Some((_, units)) => units.push(unit.to_string()),
                None => grouped.push((course.to_string(), vec![unit.to_string()])),
            }
        }
        Ok(grouped)
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty() && self.curriculum.is_none()
    }
}

#[derive(Debug, Args)]
pub struct StudentsArgs {
    /// Directory of student records (.json) or IEP forms (.pdf/.txt).
    #[arg(short, long)]
    pub students: PathBuf,

    /// Only evaluate these students (case-insensitive), repeatable.
    #[arg(long = "name")]
    pub names: Vec<String>,

    #[command(flatten)]
    pub materials: MaterialArgs,

    /// Payload output file.
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct CompetenciesArgs {
    /// Competency / directive schema files.
    #[arg(short, long, num_args = 1.., required = true)]
    pub directives: Vec<PathBuf>,

    #[command(flatten)]
    pub materials: MaterialArgs,

    /// Grade band to take indicators from (default: first available).
    #[arg(long)]
    pub grade_band: Option<String>,

    /// Payload output file.
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct GlobalFlags {
    /// JSON config file. Missing fields take defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub ollama_url: Option<String>,

    /// Independent samples per work unit.
    #[arg(short = 'n', long, global = true)]
    pub generations: Option<u32>,

    /// Work units evaluated concurrently.
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Per-call model timeout.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Vision model used to OCR scanned PDF pages.
    #[arg(long, global = true)]
    pub vision_model: Option<String>,

    /// Tesseract data directory (builds with the `ocr` feature).
    #[arg(long, global = true)]
    pub tessdata: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalFlags {
    /// File (or defaults), then environment, then flags.
    pub fn resolve_config(&self) -> anyhow::Result<AlignmentConfig> {
        let base = match &self.config {
            Some(path) => AlignmentConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => AlignmentConfig::default(),
        };
        let mut config = base.with_env_overrides();

        if let Some(model) = &self.model {
            config.model.model_name = model.clone();
        }
        if let Some(url) = &self.ollama_url {
            config.model.ollama_url = url.clone();
        }
        if let Some(n) = self.generations {
            config.sampling.generations = n;
        }
        if let Some(w) = self.workers {
            config.sampling.workers = w;
        }
        if let Some(t) = self.timeout_secs {
            config.sampling.call_timeout_secs = t;
        }
        if let Some(vision) = &self.vision_model {
            config.model.vision_model = Some(vision.clone());
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

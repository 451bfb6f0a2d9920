use clap::Parser;
use std::path::PathBuf;

use crate::clean::CleanConfig;
use crate::utils::DynError;

pub const DEFAULT_NSAMP: usize = 8000;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Three-component CLEAN-Capon array beamformer",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  clean_capon --data sac/ --nsamp 8000 --find 80 --fave 4 --cln-iter 10 --plot\n  clean_capon --data sac/ --smin -40 --smax 40 --sinc 0.5 --control 0.2 --show-peak-info\n  clean_capon --synth --cln-iter 20 --show-clean-hist --plot --outdir out\n"
)]
pub struct Args {
    /// Directory of SAC files, one file per station and component
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Run on built-in synthetic two-source data instead of SAC input
    #[arg(long)]
    pub synth: bool,

    /// Filename suffix selecting the vertical component
    #[arg(long = "suffix-z", default_value = "z")]
    pub suffix_z: String,

    /// Filename suffix selecting the first horizontal component
    #[arg(long = "suffix-h1", visible_alias = "suffix-n", default_value = "n")]
    pub suffix_h1: String,

    /// Filename suffix selecting the second horizontal component
    #[arg(long = "suffix-h2", visible_alias = "suffix-e", default_value = "e")]
    pub suffix_h2: String,

    /// Subwindow length in samples (50% overlap between subwindows)
    #[arg(long, default_value_t = DEFAULT_NSAMP)]
    pub nsamp: usize,

    /// Minimum slowness of the search grid [s/deg]
    #[arg(long, allow_hyphen_values = true, default_value_t = -40.0)]
    pub smin: f64,

    /// Maximum slowness of the search grid [s/deg]
    #[arg(long, allow_hyphen_values = true, default_value_t = 40.0)]
    pub smax: f64,

    /// Slowness grid increment [s/deg]
    #[arg(long, default_value_t = 1.0)]
    pub sinc: f64,

    /// Target frequency bin index (frequency = find / (nsamp * dt))
    #[arg(long, default_value_t = 80)]
    pub find: usize,

    /// Frequency averaging half-bandwidth in bins
    #[arg(long, default_value_t = 4)]
    pub fave: usize,

    /// CLEAN loop gain in (0, 1]
    #[arg(long, default_value_t = 0.1)]
    pub control: f64,

    /// Number of CLEAN iterations (0 = plain Capon beamforming)
    #[arg(long = "cln-iter", visible_alias = "iter", default_value_t = 0)]
    pub cln_iter: usize,

    /// Nested peak-refinement passes (0 disables refinement)
    #[arg(long = "refine-depth", visible_alias = "grid-refine", default_value_t = 2)]
    pub refine_depth: usize,

    /// Grid subdivision per refinement pass
    #[arg(long = "refine-factor", default_value_t = 5)]
    pub refine_factor: usize,

    /// Relative diagonal loading applied when direct CSDM inversion fails
    /// (0 disables the fallback)
    #[arg(long = "loading", default_value_t = 1e-6)]
    pub loading_scale: f64,

    /// Instrument gain divided out of every trace before processing
    #[arg(long)]
    pub gain: Option<f64>,

    /// Number of parallel worker threads
    #[arg(long, default_value_t = 2)]
    pub cpu: usize,

    /// Print refined peak slowness and power per channel
    #[arg(long = "show-peak-info", visible_alias = "peaks")]
    pub show_peak_info: bool,

    /// Print the per-iteration CLEAN removal history
    #[arg(long = "show-clean-hist", visible_alias = "hist")]
    pub show_clean_hist: bool,

    /// Write slowness power-map and history plots
    #[arg(long)]
    pub plot: bool,

    /// Output directory for plots
    #[arg(long, default_value = ".")]
    pub outdir: PathBuf,

    /// Heatmap floor in dB relative to the map peak (must be negative)
    #[arg(long = "min-db", allow_hyphen_values = true, default_value_t = -12.0)]
    pub min_db: f64,
}

impl Args {
    pub fn build_config(&self) -> Result<CleanConfig, DynError> {
        let cfg = CleanConfig {
            nsamp: self.nsamp,
            smin: self.smin,
            smax: self.smax,
            sinc: self.sinc,
            find: self.find,
            fave: self.fave,
            control: self.control,
            iterations: self.cln_iter,
            refine_depth: self.refine_depth,
            refine_factor: self.refine_factor,
            loading_scale: self.loading_scale,
            track_history: self.show_clean_hist || self.plot,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

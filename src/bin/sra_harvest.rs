use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use sra_meta_harvest::app::App;
use sra_meta_harvest::config::{DebugTarget, RunConfig, DEFAULT_LLM_URL, DEFAULT_MODEL};
use sra_meta_harvest::domain::Keyword;
use sra_meta_harvest::entrez::EntrezHttpClient;
use sra_meta_harvest::error::HarvestError;
use sra_meta_harvest::geo::{GeoHttpClient, LinkedRecordFetcher};
use sra_meta_harvest::keywords::KeywordProvider;
use sra_meta_harvest::llm::{LlmGateway, OllamaHttpClient};
use sra_meta_harvest::output::JsonOutput;
use sra_meta_harvest::writer::CsvResultWriter;

#[derive(Parser)]
#[command(name = "sra-harvest")]
#[command(about = "Harvest SRA experiment metadata by keyword, enrich with linked GEO records, and structure it through a local LLM")]
#[command(version, author)]
struct Cli {
    /// CSV/text file with one search keyword per row
    input: Utf8PathBuf,

    /// Output CSV the result rows are appended to
    output: Utf8PathBuf,

    /// Column name holding keywords; first column when omitted
    #[arg(long)]
    keyword_column: Option<String>,

    /// Model identifier on the inference endpoint
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the inference endpoint
    #[arg(long, default_value = DEFAULT_LLM_URL)]
    llm_url: String,

    /// Worker-pool width for experiment pipelines within a keyword
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Force fully sequential processing (same as --workers 1)
    #[arg(long)]
    sequential: bool,

    /// Directory for per-experiment raw model responses
    #[arg(long, default_value = "model_responses")]
    responses_dir: Utf8PathBuf,

    /// Optional directory to persist fetched SRA XML records
    #[arg(long)]
    save_xml_dir: Option<Utf8PathBuf>,

    /// Optional directory to persist fetched GEO SOFT records
    #[arg(long)]
    save_geo_dir: Option<Utf8PathBuf>,

    /// Process exactly one experiment accession and exit
    #[arg(long, requires = "debug_keyword")]
    debug_experiment: Option<String>,

    /// Keyword recorded alongside --debug-experiment
    #[arg(long, requires = "debug_experiment")]
    debug_keyword: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(harvest) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(harvest));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::KeywordInput(_)
        | HarvestError::MissingKeywordColumn(_)
        | HarvestError::InvalidConfig(_)
        | HarvestError::InvalidExperimentId(_)
        | HarvestError::OutputUnwritable(_)
        | HarvestError::LlmUnavailable(_) => 2,
        HarvestError::EntrezHttp(_)
        | HarvestError::EntrezStatus { .. }
        | HarvestError::GeoHttp(_)
        | HarvestError::GeoStatus { .. }
        | HarvestError::LlmHttp(_)
        | HarvestError::LlmStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let debug = match (cli.debug_experiment, cli.debug_keyword) {
        (Some(experiment), Some(keyword)) => Some(DebugTarget {
            experiment: experiment.parse().into_diagnostic()?,
            keyword: Keyword::new(&keyword)
                .ok_or_else(|| miette::Report::msg("debug keyword must not be empty"))?,
        }),
        _ => None,
    };

    let config = RunConfig {
        model: cli.model,
        llm_base_url: cli.llm_url,
        workers: if cli.sequential { 1 } else { cli.workers },
        input_path: cli.input,
        keyword_column: cli.keyword_column,
        output_path: cli.output,
        responses_dir: cli.responses_dir,
        save_xml_dir: cli.save_xml_dir,
        save_geo_dir: cli.save_geo_dir,
        debug,
    };
    config.validate().into_diagnostic()?;

    let keywords = if config.debug.is_some() {
        Vec::new()
    } else {
        KeywordProvider::new(config.input_path.clone(), config.keyword_column.clone())
            .load()
            .into_diagnostic()?
    };

    let archive = EntrezHttpClient::new(config.save_xml_dir.clone()).into_diagnostic()?;
    let geo = GeoHttpClient::new().into_diagnostic()?;
    let fetcher = LinkedRecordFetcher::new(geo, config.save_geo_dir.clone());
    let llm = OllamaHttpClient::new(&config.llm_base_url, &config.model).into_diagnostic()?;
    let gateway = LlmGateway::new(llm, config.responses_dir.clone());

    let output_path = config.output_path.clone();
    let app = App::new(config, archive, fetcher, gateway);
    app.startup_check().into_diagnostic()?;

    let writer = CsvResultWriter::open(&output_path).into_diagnostic()?;
    let summary = app.run(&keywords, writer).into_diagnostic()?;
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}

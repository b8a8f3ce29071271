//! docsift command-line entrypoint.
//!
//! Every subcommand builds the service from environment configuration, runs one operation for
//! one tenant, and prints the result as JSON on stdout. Logs go to stderr and the log file.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docsift::{
    config::Config,
    logging,
    metrics::PipelineMetrics,
    processing::ProcessingService,
    retrieval::{FieldSpec, RetrievalRequest, parse_template_fields},
    tenant::TenantId,
    vector::MetadataFilter,
};
use serde::Serialize;
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docsift",
    version,
    about = "Tenant-scoped document chunking and evidence retrieval"
)]
struct Cli {
    /// Tenant whose documents are read or written.
    #[arg(long, short, global = true, env = "DOCSIFT_TENANT")]
    tenant: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest files or directories (walked recursively).
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Document type overriding the file extension.
        #[arg(long = "type")]
        doc_type: Option<String>,
    },
    /// Retrieve ranked evidence for a query.
    Query {
        /// Query text.
        query: String,
        /// Number of results to return.
        #[arg(long)]
        limit: Option<usize>,
        /// Restrict the search to one document.
        #[arg(long)]
        document: Option<String>,
        /// Print the rendered evidence context instead of JSON.
        #[arg(long)]
        context: bool,
    },
    /// Fill template fields from the tenant's documents.
    Fields {
        /// Field names to extract.
        #[arg(long = "field")]
        fields: Vec<String>,
        /// Template whose `{field}`, `[field]`, or `<field>` placeholders are extracted.
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Delete every vector of one document.
    Delete {
        /// Document id returned by `ingest`.
        document: String,
    },
    /// Delete vectors whose document is not in the keep list.
    Cleanup {
        /// Document ids to keep.
        #[arg(long = "keep")]
        keep: Vec<String>,
    },
    /// Show vector count and backend.
    Stats,
}

#[derive(Serialize)]
struct FileReport {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    chunks_indexed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    config.log_summary();

    let tenant = match cli.tenant.as_deref() {
        Some(raw) => TenantId::new(raw).context("invalid tenant id")?,
        None => bail!("a tenant is required (--tenant or DOCSIFT_TENANT)"),
    };

    let service = ProcessingService::from_config(&config, Arc::new(PipelineMetrics::new()))
        .await
        .context("failed to initialize docsift")?;

    match cli.command {
        Command::Ingest { paths, doc_type } => {
            ingest(&service, &tenant, &paths, doc_type.as_deref()).await
        }
        Command::Query {
            query,
            limit,
            document,
            context,
        } => {
            let mut request = RetrievalRequest::new(tenant, query);
            request.final_count = limit;
            request.filter = MetadataFilter {
                document_id: document,
                ..MetadataFilter::default()
            };
            let (response, bundle) = service
                .retrieve_evidence(request)
                .await
                .context("retrieval failed")?;
            if context {
                println!("{}", bundle.render_context());
                Ok(())
            } else {
                print_json(&json!({
                    "results": response.results,
                    "stats": response.stats,
                    "analysis_quality": bundle.analysis_quality,
                    "recommendation": bundle.analysis_quality.recommendation(),
                }))
            }
        }
        Command::Fields { fields, template } => {
            let mut specs: Vec<FieldSpec> = fields.into_iter().map(FieldSpec::new).collect();
            if let Some(path) = template {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read template at {}", path.display()))?;
                specs.extend(parse_template_fields(&text));
            }
            if specs.is_empty() {
                bail!("no fields given (use --field or --template)");
            }
            let values = service
                .field_extractor()
                .extract_fields(&tenant, &specs)
                .await;
            print_json(&values)
        }
        Command::Delete { document } => {
            let removed = service
                .pipeline()
                .delete_document(&tenant, &document)
                .await
                .context("delete failed")?;
            print_json(&json!({ "document_id": document, "removed": removed }))
        }
        Command::Cleanup { keep } => {
            let removed = service
                .pipeline()
                .cleanup_orphans(&tenant, &keep)
                .await
                .context("cleanup failed")?;
            print_json(&json!({ "kept_documents": keep.len(), "removed": removed }))
        }
        Command::Stats => {
            let stats = service
                .pipeline()
                .index_stats(&tenant)
                .await
                .context("failed to read index stats")?;
            print_json(&stats)
        }
    }?;

    tracing::debug!(metrics = ?service.metrics_snapshot(), "Command finished");
    Ok(())
}

async fn ingest(
    service: &ProcessingService,
    tenant: &TenantId,
    paths: &[PathBuf],
    doc_type: Option<&str>,
) -> Result<()> {
    let mut reports = Vec::new();
    for file in collect_files(paths) {
        let display_path = file.display().to_string();
        let bytes = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = %display_path, %error, "Failed to read file");
                reports.push(FileReport {
                    path: display_path,
                    document_id: None,
                    chunks_indexed: 0,
                    error: Some(error.to_string()),
                });
                continue;
            }
        };
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_path.clone());
        let report = match service
            .pipeline()
            .ingest_bytes(tenant, &filename, &bytes, doc_type)
            .await
        {
            Ok(outcome) => FileReport {
                path: display_path,
                document_id: Some(outcome.document.id),
                chunks_indexed: outcome.chunks_indexed,
                error: None,
            },
            Err(error) => FileReport {
                path: display_path,
                document_id: None,
                chunks_indexed: 0,
                error: Some(error.to_string()),
            },
        };
        reports.push(report);
    }

    let failed = reports.iter().filter(|report| report.error.is_some()).count();
    print_json(&reports)?;
    if failed == reports.len() && !reports.is_empty() {
        bail!("no document could be ingested");
    }
    Ok(())
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(walk_dir(path));
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn walk_dir(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!(%error, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}

use std::net::SocketAddr;

use kontur_backend_core::api::server::serve;
use kontur_backend_core::catalog::ParameterCatalog;
use kontur_backend_core::config::{default_app_root, resolve_backend_settings};
use kontur_backend_core::db::history::{HistoryQuery, HistoryStore};
use kontur_backend_core::db::resolve_db_config;
use kontur_backend_core::enhance::enhance_prompt;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    let rest: Vec<String> = cli_args.iter().skip(1).cloned().collect();
    match cli_args.first().map(String::as_str) {
        Some("catalog") => return run_catalog_cli(rest),
        Some("history") => return run_history_cli(rest),
        Some("enhance") => return run_enhance_cli(rest),
        Some("serve") => return run_serve(rest).await,
        Some("-h" | "--help") => {
            print_root_usage();
            return Ok(());
        }
        Some(unknown) => {
            eprintln!("Unknown subcommand: {unknown}");
            print_root_usage();
            std::process::exit(2);
        }
        None => {}
    }

    run_serve(Vec::new()).await
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

async fn run_serve(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(unknown) = args.first() {
        eprintln!("Unknown argument: {unknown}");
        print_root_usage();
        std::process::exit(2);
    }

    let settings = resolve_backend_settings(default_app_root().as_path())?;
    let addr: SocketAddr = settings.bind.parse()?;
    serve(addr, settings).await?;
    Ok(())
}

fn parse_or_exit<T>(result: Result<T, String>, usage: fn()) -> T {
    match result {
        Ok(value) => value,
        Err(message) => {
            eprintln!("{message}");
            usage();
            std::process::exit(2);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogKind {
    Presets,
    Templates,
    Styles,
    Prompts,
    Models,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CatalogCliArgs {
    kind: CatalogKind,
}

fn parse_catalog_cli_args(args: &[String]) -> Result<CatalogCliArgs, String> {
    let mut kind = None::<CatalogKind>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--kind" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(format!("Missing value for {flag}"));
                };
                kind = Some(match value.trim().to_ascii_lowercase().as_str() {
                    "presets" => CatalogKind::Presets,
                    "templates" => CatalogKind::Templates,
                    "styles" => CatalogKind::Styles,
                    "prompts" => CatalogKind::Prompts,
                    "models" => CatalogKind::Models,
                    other => {
                        return Err(format!(
                            "Unknown catalog kind '{other}'; expected presets, templates, styles, prompts, or models"
                        ));
                    }
                });
                i += 2;
            }
            unknown => return Err(format!("Unknown argument: {unknown}")),
        }
    }

    let kind = kind.ok_or_else(|| String::from("Missing required --kind"))?;
    Ok(CatalogCliArgs { kind })
}

fn run_catalog_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_catalog_usage();
        return Ok(());
    }

    let parsed = parse_or_exit(parse_catalog_cli_args(args.as_slice()), print_catalog_usage);
    let catalog = ParameterCatalog::builtin();
    let payload = match parsed.kind {
        CatalogKind::Presets => serde_json::to_value(catalog.svg_presets())?,
        CatalogKind::Templates => serde_json::to_value(catalog.templates())?,
        CatalogKind::Styles => serde_json::to_value(catalog.enhancement_styles())?,
        CatalogKind::Prompts => serde_json::to_value(catalog.prompt_categories())?,
        CatalogKind::Models => serde_json::to_value(catalog.models())?,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HistoryCliArgs {
    limit: Option<u32>,
    offset: Option<u32>,
    search: Option<String>,
}

fn parse_history_cli_args(args: &[String]) -> Result<HistoryCliArgs, String> {
    let mut out = HistoryCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, String> {
            args.get(idx + 1)
                .cloned()
                .ok_or_else(|| format!("Missing value for {flag}"))
        };

        match flag {
            "--limit" => {
                let raw = needs_value(i)?;
                out.limit = Some(parse_count(raw.as_str(), flag)?);
                i += 2;
            }
            "--offset" => {
                let raw = needs_value(i)?;
                out.offset = Some(parse_count(raw.as_str(), flag)?);
                i += 2;
            }
            "--search" => {
                out.search = Some(needs_value(i)?);
                i += 2;
            }
            unknown => return Err(format!("Unknown argument: {unknown}")),
        }
    }
    Ok(out)
}

fn parse_count(raw: &str, flag: &str) -> Result<u32, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("Flag {flag} needs a whole number, got '{raw}'"))
}

fn run_history_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_history_usage();
        return Ok(());
    }

    let parsed = parse_or_exit(parse_history_cli_args(args.as_slice()), print_history_usage);
    let settings = resolve_backend_settings(default_app_root().as_path())?;
    let store = HistoryStore::new(resolve_db_config(settings.data_root.as_path()).db_path);
    let records = store.list(&HistoryQuery {
        limit: parsed.limit,
        offset: parsed.offset,
        search: parsed.search,
    })?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EnhanceCliArgs {
    prompt: String,
    style: Option<String>,
}

fn parse_enhance_cli_args(args: &[String]) -> Result<EnhanceCliArgs, String> {
    let mut prompt = None::<String>;
    let mut style = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, String> {
            args.get(idx + 1)
                .cloned()
                .ok_or_else(|| format!("Missing value for {flag}"))
        };

        match flag {
            "--prompt" => {
                prompt = Some(needs_value(i)?);
                i += 2;
            }
            "--style" => {
                style = Some(needs_value(i)?);
                i += 2;
            }
            unknown => return Err(format!("Unknown argument: {unknown}")),
        }
    }

    let prompt = prompt
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| String::from("Missing required --prompt"))?;
    let style = style
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    Ok(EnhanceCliArgs { prompt, style })
}

fn run_enhance_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_enhance_usage();
        return Ok(());
    }

    let parsed = parse_or_exit(parse_enhance_cli_args(args.as_slice()), print_enhance_usage);
    let catalog = ParameterCatalog::builtin();
    let style = match parsed.style.as_deref() {
        Some(identifier) => Some(catalog.enhancement_style(identifier)?),
        None => None,
    };
    let enhanced = enhance_prompt(parsed.prompt.as_str(), style);
    println!("{}", serde_json::to_string_pretty(&enhanced)?);
    Ok(())
}

fn print_root_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- [serve]\n",
        "  cargo run -- catalog --kind <presets|templates|styles|prompts|models>\n",
        "  cargo run -- history [--limit N] [--offset N] [--search TEXT]\n",
        "  cargo run -- enhance --prompt TEXT [--style STYLE]\n\n",
        "serve is the default subcommand and honors KONTUR_BACKEND_BIND.\n"
    ));
}

fn print_catalog_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- catalog --kind <presets|templates|styles|prompts|models>\n"
    ));
}

fn print_history_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- history [--limit N] [--offset N] [--search TEXT]\n"
    ));
}

fn print_enhance_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- enhance --prompt TEXT [--style STYLE]\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_catalog_requires_kind() {
        let err = parse_catalog_cli_args(&[]).expect_err("kind should be required");
        assert!(err.contains("--kind"));
    }

    #[test]
    fn parse_catalog_accepts_each_kind() {
        for (raw, kind) in [
            ("presets", CatalogKind::Presets),
            ("templates", CatalogKind::Templates),
            ("styles", CatalogKind::Styles),
            ("prompts", CatalogKind::Prompts),
            ("models", CatalogKind::Models),
        ] {
            let parsed =
                parse_catalog_cli_args(&[String::from("--kind"), String::from(raw)])
                    .expect("parse should succeed");
            assert_eq!(parsed.kind, kind);
        }
    }

    #[test]
    fn parse_catalog_rejects_unknown_kind() {
        let err = parse_catalog_cli_args(&[String::from("--kind"), String::from("palettes")])
            .expect_err("unknown kind should be rejected");
        assert!(err.contains("palettes"));
    }

    #[test]
    fn parse_history_accepts_paging_flags() {
        let parsed = parse_history_cli_args(&[
            String::from("--limit"),
            String::from("10"),
            String::from("--offset"),
            String::from("20"),
            String::from("--search"),
            String::from("fox"),
        ])
        .expect("parse should succeed");
        assert_eq!(parsed.limit, Some(10));
        assert_eq!(parsed.offset, Some(20));
        assert_eq!(parsed.search.as_deref(), Some("fox"));
    }

    #[test]
    fn parse_history_rejects_non_numeric_limit() {
        let err = parse_history_cli_args(&[String::from("--limit"), String::from("many")])
            .expect_err("non-numeric limit should be rejected");
        assert!(err.contains("--limit"));
    }

    #[test]
    fn parse_history_rejects_unknown_flags() {
        let err = parse_history_cli_args(&[String::from("--order"), String::from("asc")])
            .expect_err("unknown flag should be rejected");
        assert!(err.contains("Unknown argument"));
    }

    #[test]
    fn parse_enhance_requires_prompt() {
        let err = parse_enhance_cli_args(&[]).expect_err("prompt should be required");
        assert!(err.contains("--prompt"));

        let err = parse_enhance_cli_args(&[String::from("--prompt"), String::from("  ")])
            .expect_err("blank prompt should be rejected");
        assert!(err.contains("--prompt"));
    }

    #[test]
    fn parse_enhance_accepts_optional_style() {
        let parsed = parse_enhance_cli_args(&[
            String::from("--prompt"),
            String::from("a mountain peak"),
            String::from("--style"),
            String::from("logo"),
        ])
        .expect("parse should succeed");
        assert_eq!(parsed.prompt, "a mountain peak");
        assert_eq!(parsed.style.as_deref(), Some("logo"));
    }
}

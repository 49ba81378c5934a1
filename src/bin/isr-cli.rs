use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "isr-cli")]
#[command(about = "Management CLI for the ISR gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "ISR_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Mark every path carrying a tag stale and re-render it
    RevalidateTag { tag: String },
    /// Mark a path stale and re-render it
    RevalidatePath { path: String },
    /// List the tags of a path
    Tags { path: String },
    /// List the paths carrying a tag
    Paths { tag: String },
    /// Show a cache entry
    CacheGet {
        key: String,
        #[arg(long, value_enum, default_value_t = Variant::Page)]
        variant: Variant,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    Page,
    Fetch,
}

impl Variant {
    fn as_str(self) -> &'static str {
        match self {
            Variant::Page => "page",
            Variant::Fetch => "fetch",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::RevalidateTag { tag } => {
            client.post(format!("{}/admin/revalidate/tag/{}", base, encode_segment(tag)))
        }
        Commands::RevalidatePath { path } => client
            .post(format!("{}/admin/revalidate/path", base))
            .query(&[("path", path)]),
        Commands::Tags { path } => client
            .get(format!("{}/admin/tags", base))
            .query(&[("path", path)]),
        Commands::Paths { tag } => {
            client.get(format!("{}/admin/tags/{}/paths", base, encode_segment(tag)))
        }
        Commands::CacheGet { key, variant } => client
            .get(format!("{}/admin/cache/{}", base, variant.as_str()))
            .query(&[("key", key)]),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

/// Percent-encode a value used as one path segment.
fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reqwest::multipart;
use serde_json::Value;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Client for the Iris image search service")]
struct Args {
    #[clap(long, default_value = "http://127.0.0.1:8080")]
    host: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Obtain a bearer token
    Login {
        #[clap(long, default_value = "user1")]
        username: String,
        #[clap(long, default_value = "password1")]
        password: String,
    },

    /// Ingest one image into the catalog
    Create {
        image: PathBuf,
        #[clap(long)]
        token: String,
        #[clap(long)]
        name: String,
        #[clap(long, default_value = "")]
        desc: String,
        #[clap(long)]
        date: Option<String>,
    },

    /// Search the catalog with a query image
    Search {
        image: PathBuf,
        #[clap(long)]
        token: String,
    },

    /// Ingest every image in a directory (names derived from file names)
    Seed {
        dir: PathBuf,
        #[clap(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = reqwest::Client::new();

    let result = match args.command {
        Command::Login { username, password } => login(&client, &args.host, &username, &password).await,
        Command::Create { image, token, name, desc, date } => {
            create(&client, &args.host, &token, &image, &name, &desc, date.as_deref()).await
        }
        Command::Search { image, token } => search(&client, &args.host, &token, &image).await,
        Command::Seed { dir, token } => seed(&client, &args.host, &token, &dir).await,
    };

    if let Err(e) = result {
        eprintln!("[\u{2717}] {}", e);
        std::process::exit(1);
    }
}

async fn login(
    client: &reqwest::Client,
    host: &str,
    username: &str,
    password: &str,
) -> Result<(), String> {
    let resp = client
        .post(format!("{host}/login"))
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = resp.status();
    let body: Value = resp.json().await.map_err(|e| e.to_string())?;

    if status.is_success() {
        println!("{}", body["token"].as_str().unwrap_or_default());
        Ok(())
    } else {
        Err(format!("login failed: {}", body["error"].as_str().unwrap_or("unknown")))
    }
}

async fn create(
    client: &reqwest::Client,
    host: &str,
    token: &str,
    image: &Path,
    name: &str,
    desc: &str,
    date: Option<&str>,
) -> Result<(), String> {
    let bytes = tokio::fs::read(image).await.map_err(|e| e.to_string())?;
    let filename = image
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".into());

    let date = date
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());

    let form = multipart::Form::new()
        .text("product_name", name.to_string())
        .text("product_desc", desc.to_string())
        .text("product_date", date)
        .part("product_image", multipart::Part::bytes(bytes).file_name(filename));

    let resp = client
        .post(format!("{host}/create"))
        .header("Authorization", token)
        .multipart(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = resp.status();
    let body: Value = resp.json().await.map_err(|e| e.to_string())?;

    if status.is_success() {
        println!("[\u{2713}] {}", body["message"].as_str().unwrap_or("created"));
        Ok(())
    } else {
        Err(format!("create failed ({status}): {body}"))
    }
}

async fn search(
    client: &reqwest::Client,
    host: &str,
    token: &str,
    image: &Path,
) -> Result<(), String> {
    let bytes = tokio::fs::read(image).await.map_err(|e| e.to_string())?;
    let filename = image
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "query.bin".into());

    let form = multipart::Form::new()
        .part("query_img", multipart::Part::bytes(bytes).file_name(filename));

    let resp = client
        .post(format!("{host}/searchImg"))
        .header("Authorization", token)
        .multipart(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = resp.status();
    let body: Value = resp.json().await.map_err(|e| e.to_string())?;

    if !status.is_success() {
        return Err(format!("search failed ({status}): {body}"));
    }

    let empty = Vec::new();
    let results = body["results"].as_array().unwrap_or(&empty);
    println!("\nFound {} matches:", results.len());
    for r in results {
        println!(
            "  \u{2022} {} (Dist: {:.4}) {}",
            r["name"].as_str().unwrap_or("?"),
            r["distance"].as_f64().unwrap_or(f64::NAN),
            r["image_path"].as_str().unwrap_or(""),
        );
    }
    println!();
    Ok(())
}

const IMAGE_EXTS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

async fn seed(
    client: &reqwest::Client,
    host: &str,
    token: &str,
    dir: &Path,
) -> Result<(), String> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| e.to_string())?;
    let mut uploaded = 0usize;

    while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".into());

        match create(client, host, token, &path, &name, &name, None).await {
            Ok(()) => uploaded += 1,
            Err(e) => eprintln!("[\u{26a0}\u{fe0f}] {}: {}", path.display(), e),
        }
    }

    println!("Seeded {} images.", uploaded);
    Ok(())
}

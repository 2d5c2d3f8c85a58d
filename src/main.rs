use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use iris::auth::{Gateway, StaticPrincipals};
use iris::embed::{Embedder, GridEmbedder};
use iris::server::{self, AppContext};
use iris::Catalog;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Catalog segment file
    #[clap(long, default_value = "catalog.dat")]
    data: PathBuf,

    /// Directory for uploaded images
    #[clap(long, default_value = "static/uploaded")]
    uploads: PathBuf,

    /// HMAC secret for signing bearer tokens
    #[clap(long, env = "IRIS_SECRET", default_value = "your_secret_key")]
    secret: String,

    /// Number of results per search
    #[clap(long, default_value = "5")]
    top_k: usize,

    /// Principals, as user:password pairs (repeatable)
    #[clap(long = "user", default_values_t = ["user1:password1".to_string(), "user2:password2".to_string()])]
    users: Vec<String>,
}

fn main() {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(async_main(workers));
}

async fn async_main(workers: usize) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,iris=info");
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    println!("--- Iris Image Search ---");
    println!("Worker Threads: {}", workers);
    println!("Catalog:        {}", args.data.display());
    println!("Uploads:        {}", args.uploads.display());
    println!("Top-K:          {}", args.top_k);
    println!("-------------------------");

    if args.secret == "your_secret_key" {
        tracing::warn!("running with the default token secret; set IRIS_SECRET in production");
    }

    std::fs::create_dir_all(&args.uploads).expect("Failed to create uploads directory");

    let embedder: Arc<dyn Embedder> = Arc::new(GridEmbedder::new());

    println!("Initializing Catalog...");
    let catalog = Arc::new(
        Catalog::open(&args.data, embedder.dim()).expect("Failed to open catalog"),
    );
    println!("Catalog ready ({} records).", catalog.len());

    // bcrypt hashing is deliberately slow; done once here, not per login
    println!("Hashing principal credentials...");
    let pairs: Vec<(&str, &str)> = args
        .users
        .iter()
        .filter_map(|entry| entry.split_once(':'))
        .collect();
    let principals =
        StaticPrincipals::from_plaintext(pairs).expect("Failed to hash user credentials");

    let ctx = Arc::new(AppContext {
        catalog,
        embedder,
        gateway: Gateway::new(args.secret, principals),
        uploads_dir: args.uploads,
        top_k: args.top_k,
    });

    let (bound, serve) =
        warp::serve(server::app(ctx)).bind_with_graceful_shutdown(args.addr, async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl-c");
        });

    println!("Iris listening on {}", bound);
    serve.await;
    println!("Shutting down.");
}

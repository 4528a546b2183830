use std::sync::Arc;

use routine_scheduler::api::{router, AppState};
use routine_scheduler::auth::SupabaseIdentityProvider;
use routine_scheduler::config::AppConfig;
use routine_scheduler::manual_runner::ManualRunner;
use routine_scheduler::prober::ReqwestProber;
use routine_scheduler::schedule_clock::SystemScheduleClock;
use routine_scheduler::scheduler::{self, Scheduler};
use routine_scheduler::secrets::EnvSecretProvider;
use routine_scheduler::store::SupabaseRoutineStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📡 routine-scheduler v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Instance: {}", config.instance_id);
    eprintln!("   HTTP: http://{}", config.http_bind_addr);
    eprintln!("   Tick every {}s, lease {}s, batch {}, concurrency {}",
        config.scheduler_tick_secs, config.lock_lease_secs, config.scheduler_batch_limit, config.max_concurrency);

    let store: Arc<dyn routine_scheduler::store::RoutineStore> = Arc::new(
        SupabaseRoutineStore::new(&config.supabase_url, &config.supabase_service_role_key, config.http_timeout_secs)
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to build store client: {e}");
                std::process::exit(1);
            }),
    );

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to build HTTP client: {e}");
            std::process::exit(1);
        });

    let secrets: Arc<dyn routine_scheduler::secrets::SecretProvider> = Arc::new(EnvSecretProvider::new());
    let prober: Arc<dyn routine_scheduler::prober::HttpProber> =
        Arc::new(ReqwestProber::new(http_client.clone(), Arc::clone(&secrets)));
    let clock: Arc<dyn routine_scheduler::schedule_clock::ScheduleClock> = Arc::new(SystemScheduleClock);
    let identity: Arc<dyn routine_scheduler::auth::IdentityProvider> = Arc::new(SupabaseIdentityProvider::new(
        http_client,
        &config.supabase_url,
        config.supabase_anon_key.clone(),
    ));

    let manual_runner = Arc::new(ManualRunner::new(Arc::clone(&store), Arc::clone(&prober)));

    let app_state = AppState {
        store: Arc::clone(&store),
        manual_runner: Arc::clone(&manual_runner),
        identity,
    };
    let app = router(app_state);
    let http_bind_addr = config.http_bind_addr.clone();
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&http_bind_addr)
            .await
            .expect("failed to bind HTTP port");
        tracing::info!(addr = %http_bind_addr, "REST server started");
        axum::serve(listener, app).await.ok();
    });

    let scheduler = Arc::new(Scheduler::new(
        store,
        prober,
        clock,
        config.instance_id.clone(),
        config.due_slack_secs,
        config.lock_lease_secs,
        config.scheduler_batch_limit,
        config.max_concurrency,
    ));
    let tick_interval = std::time::Duration::from_secs(config.scheduler_tick_secs);
    let ticker_handle = scheduler::spawn_ticker(scheduler, tick_interval);

    ticker_handle.await?;
    Ok(())
}

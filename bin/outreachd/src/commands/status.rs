use outreach_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("outreachd status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:      {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (using defaults)" }
    );

    let heal_dir = paths.heal_state_dir();
    let pending = std::fs::read_dir(&heal_dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0);
    println!("Heal state:  {} ({} pending)", heal_dir.display(), pending);

    let key_file = paths.sealbox_key_file();
    println!(
        "Sealbox key: {} {}",
        key_file.display(),
        if key_file.exists() { "✓" } else { "✗ (generated on first heal)" }
    );

    let config = Config::load_or_default(&paths)?;
    println!();
    println!("Dispatcher:    {}", config.transport.url);
    match config.control_plane_url() {
        Some(url) => println!("Control plane: {}", url),
        None => println!("Control plane: not configured (degraded defaults)"),
    }
    println!(
        "Queue:         concurrency {}, cap {}, TTL {}m",
        config.queue.concurrency, config.queue.max_tracked_jobs, config.queue.completed_ttl_mins
    );
    println!(
        "Health:        http://{}:{}/v1/health",
        config.health.host, config.health.port
    );

    Ok(())
}

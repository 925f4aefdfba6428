//! Environment readiness check.

use anyhow::Result;
use placeharvest::config::{self, HarvestConfig, CONFIG_ENV};
use placeharvest::renderer::chromium::find_chromium;
use std::path::Path;

/// Check Chromium availability, the configuration and the selector set.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("placeharvest doctor");
    println!("===================");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let chromium = find_chromium();
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Set PLACEHARVEST_CHROMIUM_PATH or install Chrome; \
             only the cheap fetch path will run."
        ),
    }

    let source = match (config_path, std::env::var(CONFIG_ENV).ok()) {
        (Some(path), _) => path.display().to_string(),
        (None, Some(env)) if !env.trim().is_empty() => format!("{env} (from {CONFIG_ENV})"),
        _ => match config::default_path() {
            Some(path) if path.exists() => path.display().to_string(),
            _ => "built-in defaults".to_string(),
        },
    };
    let config_ok = match HarvestConfig::load(config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => {
            println!("[OK] Configuration valid: {source}");
            println!(
                "     concurrency {}, {} proxies, reviews {}, images {}",
                config.concurrency,
                config.proxies.len(),
                config.include_reviews,
                config.include_images
            );
            match config.selectors() {
                Ok(_) => {
                    println!("[OK] Selector set valid");
                    true
                }
                Err(e) => {
                    println!("[!!] Selector set invalid: {e}");
                    false
                }
            }
        }
        Err(e) => {
            println!("[!!] Configuration invalid ({source}): {e}");
            false
        }
    };

    println!();
    if config_ok && chromium.is_some() {
        println!("Status: READY");
    } else if config_ok {
        println!("Status: DEGRADED (no browser)");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}

use fintrack_sync::proxy::Proxy;
use fintrack_sync::ProxyConfig;

fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let config = ProxyConfig::from_env();
  if config.sheets_url.is_none() || config.sheets_api_key.is_none() {
    log::warn!("SHEETS_API_URL/SHEETS_API_KEY not set, /api/sheets will answer 500");
  }
  if config.gemini_api_key.is_none() {
    log::warn!("GEMINI_API_KEY not set, /api/report will answer 500");
  }

  let proxy = Proxy::new(config).expect("Failed to build upstream HTTP client");
  if let Err(err) = proxy.serve() {
    log::error!("proxy stopped: {err}");
    std::process::exit(1);
  }
}

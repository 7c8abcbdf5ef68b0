//! layer-session-tool — Inspect, upgrade and export session strings.
//!
//! ```text
//! layer-session-tool inspect <session-string>
//! layer-session-tool upgrade <session-string> [api-id]
//! layer-session-tool export  <path.session>
//! ```
//!
//! Logging: RUST_LOG=layer_session=debug layer-session-tool …

use std::path::Path;

use layer_session::{FileStorage, SessionRecord, Storage, session_string};

const USAGE: &str = "\
usage:
  layer-session-tool inspect <session-string>
  layer-session-tool upgrade <session-string> [api-id]
  layer-session-tool export  <path.session>";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("layer_session=info"))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let result = match args.as_slice() {
        ["inspect", token]         => inspect(token),
        ["upgrade", token]         => upgrade(token, None),
        ["upgrade", token, api_id] => match api_id.parse() {
            Ok(id) => upgrade(token, Some(id)),
            Err(e) => Err(format!("invalid api-id {api_id:?}: {e}").into()),
        },
        ["export", path]           => export(Path::new(path)),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

fn inspect(token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let decoded = session_string::decode(token)?;
    println!("layout      {:?} ({} bytes)", decoded.layout, decoded.layout.size());
    print_record(&decoded.record);
    if !decoded.layout.has_endpoints() {
        println!("(no endpoints stored; `upgrade` fills them from the DC table)");
    }
    Ok(())
}

fn upgrade(token: &str, api_id: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let decoded = session_string::decode(token)?;
    let mut record = decoded.record;
    if !decoded.layout.has_endpoints() {
        record.fill_default_endpoints();
    }
    if let Some(id) = api_id {
        record.api_id = id;
    }
    if record.api_id == 0 {
        eprintln!("! api_id is 0; pass it as the last argument");
    }
    println!("{}", session_string::encode(&record)?);
    Ok(())
}

fn export(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()).into());
    }
    let storage = FileStorage::new(path);
    storage.open()?;

    let date = storage.date()?;
    match chrono::DateTime::from_timestamp(i64::from(date), 0) {
        Some(saved) if date > 0 => eprintln!("last saved  {}", saved.format("%Y-%m-%d %H:%M:%S UTC")),
        _                       => eprintln!("last saved  never"),
    }
    println!("{}", storage.export_session_string()?);
    Ok(())
}

fn print_record(r: &SessionRecord) {
    println!("dc_id       {}", r.dc_id);
    println!("api_id      {}", r.api_id);
    println!("test_mode   {}", r.test_mode);
    println!("auth_key    id={:#018x}", r.auth_key_id());
    println!("user_id     {}", r.user_id);
    println!("is_bot      {}", r.is_bot);
    println!("server      {} / [{}]:{}", r.server_address, r.server_address_v6, r.server_port);
    println!("media       {} / [{}]:{}", r.media_address, r.media_address_v6, r.media_port);
}

use std::fs;

fn main() -> anyhow::Result<()> {
    let port = std::env::args()
        .nth(1)
        .map(|value| value.parse::<u16>())
        .transpose()?
        .unwrap_or(8000);

    let doc = steward::docs::build_openapi(port)?;
    let s = serde_json::to_string_pretty(&doc)?;
    let path = "openapi.json";
    fs::write(path, s)?;
    println!("wrote {}", path);
    Ok(())
}

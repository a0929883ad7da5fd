use std::fs;

fn main() -> anyhow::Result<()> {
    let doc = tatame::docs::build_openapi(8000);
    let json = serde_json::to_string_pretty(&doc)?;
    let path = "/tmp/tatame-openapi.json";
    fs::write(path, json)?;
    println!("wrote {}", path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto = "proto/manifest_promotion.proto";

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&[proto], &["proto"])?;

    println!("cargo:rerun-if-changed={}", proto);
    Ok(())
}

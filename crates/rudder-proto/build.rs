fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tiller is the client; only the server side is generated
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/hapi/services/rudder.proto"], &["proto"])?;

    // Re-run if any proto file changes
    println!("cargo:rerun-if-changed=proto");

    Ok(())
}

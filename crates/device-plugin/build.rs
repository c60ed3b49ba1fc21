fn main() -> Result<(), Box<dyn std::error::Error>> {
    // prefer a protoc from the environment, fall back to the vendored binary
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // The registration server is only used by tests standing in for the kubelet.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/api.proto"], &["proto"])?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Source a protoc binary when one is not available on the system PATH.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }

    // Compile all modular proto files
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/common.proto",
                "proto/accounts.proto",
                "proto/lobby.proto",
                "proto/play.proto",
                "proto/tempo_service.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}

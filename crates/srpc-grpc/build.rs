fn main() -> Result<(), Box<dyn std::error::Error>> {
    // protoc isn't assumed to be on PATH; point prost-build at the vendored binary.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../../proto/srpc.proto"], &["../../proto"])?;
    println!("cargo:rerun-if-changed=../../proto/srpc.proto");
    Ok(())
}

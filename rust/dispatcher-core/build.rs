fn main() {
    #[cfg(feature = "grpc")]
    {
        let proto_file = "../../proto/dispatcher.proto";
        let proto_dir = "../../proto";

        // Rerun if proto file changes
        println!("cargo:rerun-if-changed={}", proto_file);

        tonic_build::configure()
            .build_server(true)
            .build_client(true)
            .compile_protos(&[proto_file], &[proto_dir])
            .expect("Failed to compile dispatcher.proto");
    }
}

fn main(){
    println!("cargo:rerun-if-changed=src/ffi/mod.rs");

    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else{
        println!("cargo:warning=CARGO_MANIFEST_DIR not set, skipping C header");
        return;
    };

    let mut config = cbindgen::Config::default();
    config.language = cbindgen::Language::C;
    config.include_guard = Some("HELM_CONTROL_H".to_string());

    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) =>{
            bindings.write_to_file("include/helm_control.h");
        }
        Err(e) => println!("cargo:warning=C header not generated: {}", e),
    }
}

fn main() {
    // Regenerate the C header for the eva_npu_* surface using cbindgen
    let crate_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");

    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("EVA_NPU_H")
        .generate()
        .expect("Unable to generate bindings")
        .write_to_file("include/eva_npu.h");

    println!("cargo:rerun-if-changed=src/capi.rs");
    println!("cargo:rerun-if-changed=src/error.rs");
}

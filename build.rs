// Release builds pass the git tag (`v1.4.0`); local builds use the crate version.
fn release_version(tag: Option<String>) -> Option<String> {
    let tag = tag?;
    let tag = tag.trim();
    let version = tag.strip_prefix('v').unwrap_or(tag);
    (!version.is_empty()).then(|| version.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=VPNDESK_GIT_TAG");

    let version = release_version(std::env::var("VPNDESK_GIT_TAG").ok())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=VPNDESK_BUILD_VERSION={version}");
}

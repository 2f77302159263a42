// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 构建脚本: ez-ffmpeg 静态链接时补齐 Windows 系统库
fn main() {
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        // vcpkg 静态 FFmpeg 依赖 (x264 / QSV / TLS / VFW)
        for lib in ["libmfx", "libx264", "oleaut32", "vfw32", "secur32"] {
            println!("cargo:rustc-link-lib=dylib={}", lib);
        }
    }
}

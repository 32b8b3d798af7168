fn main() {
    // デスクトップシェル有効時のみ tauri.conf.json からコンテキストを生成する
    #[cfg(feature = "desktop")]
    tauri_build::build();
}

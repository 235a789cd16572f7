fn main() {
    // 編譯控制面板 UI (ui/lightwindow.slint)
    slint_build::compile("ui/lightwindow.slint").unwrap();
}

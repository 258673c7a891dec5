//! 主题色定义，全局统一使用

use ratatui::style::Color;

/// 强调色
pub const ACCENT: Color = Color::Rgb(91, 206, 250);
/// 选中行背景色
pub const SEL_BG: Color = Color::Rgb(45, 35, 55);
/// 亮白色
pub const BRIGHT_WHITE: Color = Color::Rgb(255, 255, 255);
/// 暗灰色（次要信息）
pub const DIM: Color = Color::Rgb(130, 130, 140);
/// 失败标题红色
pub const ERROR_RED: Color = Color::Rgb(211, 47, 47);

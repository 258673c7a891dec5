//! RemoteUpdateManager 输出解析
//!
//! 列表输出按 [`RECORD_FORMATS`] 解析记录行；安装输出逐行分类，分类规则
//! 集中在 [`OUTPUT_PATTERNS`] 表中，新增输出格式只需追加一项。

use super::types::UpdateEntry;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

/// 清理终端输出中的 ANSI 转义序列和控制字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }

    result.trim().to_string()
}

// ========== 产品名称 ==========

/// SAP 代码 → 产品名（顺序即模糊匹配的优先级）
const SAP_NAMES: &[(&str, &str)] = &[
    ("Acrobat", "Acrobat DC"),
    ("AcrobatDC", "Acrobat DC"),
    ("AdobeAcrobatDC", "Acrobat DC"),
    ("AcroRdr", "Acrobat Reader"),
    ("Reader", "Acrobat Reader"),
    ("PHSP", "Photoshop"),
    ("Photoshop", "Photoshop"),
    ("ILST", "Illustrator"),
    ("Illustrator", "Illustrator"),
    ("IDSN", "InDesign"),
    ("InDesign", "InDesign"),
    ("AICY", "InCopy"),
    ("InCopy", "InCopy"),
    ("PPRO", "Premiere Pro"),
    ("PremierePro", "Premiere Pro"),
    ("Premiere", "Premiere Pro"),
    ("AEFT", "After Effects"),
    ("AfterEffects", "After Effects"),
    ("AME", "Media Encoder"),
    ("MediaEncoder", "Media Encoder"),
    ("LRCC", "Lightroom"),
    ("LrMobile", "Lightroom"),
    ("Lightroom", "Lightroom"),
    ("LTRM", "Lightroom Classic"),
    ("LRClassic", "Lightroom Classic"),
    ("LightroomClassic", "Lightroom Classic"),
    ("KBRG", "Bridge"),
    ("Bridge", "Bridge"),
    ("FLPR", "Animate"),
    ("Animate", "Animate"),
    ("DRWV", "Dreamweaver"),
    ("Dreamweaver", "Dreamweaver"),
    ("AUDT", "Audition"),
    ("Audition", "Audition"),
    ("CHAR", "Character Animator"),
    ("CharacterAnimator", "Character Animator"),
    ("ESHR", "Dimension"),
    ("Dimension", "Dimension"),
    ("FRSC", "Fresco"),
    ("Fresco", "Fresco"),
    ("SPRK", "Adobe XD"),
    ("XD", "Adobe XD"),
    ("RUSH", "Premiere Rush"),
    ("PremiereRush", "Premiere Rush"),
    ("SBSTD", "Substance 3D Designer"),
    ("SBSTP", "Substance 3D Painter"),
    ("SBSTA", "Substance 3D Sampler"),
    ("STGR", "Substance 3D Stager"),
    ("SHPR", "Substance 3D Modeler"),
    ("ACR", "Adobe Camera Raw"),
    ("CCXP", "Creative Cloud Experience"),
    ("HLAN", "Highlights (HLAN)"),
    ("SEPS", "Stager (SEPS)"),
];

/// 把 SAP 代码映射为友好名称：先精确匹配，再按包含关系匹配，都不中则返回代码本身
pub fn product_name(sap_code: &str) -> String {
    let clean = sap_code.split('-').next().unwrap_or(sap_code).trim();
    if let Some((_, name)) = SAP_NAMES.iter().find(|(code, _)| *code == clean) {
        return name.to_string();
    }
    if let Some((_, name)) = SAP_NAMES.iter().find(|(code, _)| clean.contains(code)) {
        return name.to_string();
    }
    clean.to_string()
}

// ========== 列表解析 ==========

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?P<num>\d+(?:\.\d+)?)\s*(?P<unit>TB|GB|MB|KB|B)\b").unwrap()
});

/// 解析大小标注，按 1024 进制换算，例如 `120MB` → 125829120
pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(text)?;
    let num: f64 = caps["num"].parse().ok()?;
    let exp = match caps["unit"].to_ascii_uppercase().as_str() {
        "B" => 0,
        "KB" => 1,
        "MB" => 2,
        "GB" => 3,
        "TB" => 4,
        _ => return None,
    };
    Some((num * 1024f64.powi(exp)).round() as u64)
}

/// 列表记录格式表中的一项
pub struct RecordFormat {
    pub name: &'static str,
    pub regex: Regex,
    pub build: fn(&Captures, &str) -> Option<UpdateEntry>,
}

fn record_format(
    name: &'static str,
    re: &str,
    build: fn(&Captures, &str) -> Option<UpdateEntry>,
) -> RecordFormat {
    RecordFormat {
        name,
        regex: Regex::new(re).unwrap(),
        build,
    }
}

/// 列表记录格式，按顺序匹配，先中先得
pub static RECORD_FORMATS: LazyLock<Vec<RecordFormat>> = LazyLock::new(|| {
    vec![
        // `- (PHSP/25.0.1/osx10-64) (120MB)`
        record_format(
            "rum-record",
            r"\((?P<code>[^/()]+)/(?P<version>[^/()]+)(?:/(?P<rest>[^()]*))?\)",
            |c, line| {
                let identifier = c["code"].trim().to_string();
                let version = c["version"].trim().to_string();
                if identifier.is_empty() || version.is_empty() {
                    return None;
                }
                let platform = c
                    .name("rest")
                    .and_then(|m| m.as_str().split('/').next())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                // 记录本身不参与大小匹配
                let record = c.get(0).map_or(0..0, |m| m.range());
                let remainder = format!("{}{}", &line[..record.start], &line[record.end..]);
                Some(UpdateEntry {
                    display_name: product_name(&identifier),
                    identifier,
                    version,
                    platform,
                    size_bytes: parse_size(&remainder),
                })
            },
        ),
        // `App B 5.0 (120MB)`：版本号必须是大小标注前的最后一个词，名称中不能有冒号
        record_format(
            "plain-record",
            r"^(?P<name>[^:()*\-\s][^:()]*?)\s+(?P<version>\d[\w.\-]*)(?:\s*\((?P<size>[^()]+)\))?$",
            |c, _| {
                let name = c["name"].trim().to_string();
                Some(UpdateEntry {
                    identifier: name.clone(),
                    display_name: name,
                    version: c["version"].to_string(),
                    platform: None,
                    size_bytes: c.name("size").and_then(|m| parse_size(m.as_str())),
                })
            },
        ),
    ]
});

fn parse_record(line: &str) -> Option<UpdateEntry> {
    RECORD_FORMATS.iter().find_map(|f| {
        let caps = f.regex.captures(line)?;
        let entry = (f.build)(&caps, line)?;
        log::trace!("[{}] {}", f.name, line);
        Some(entry)
    })
}

/// 解析 `--action=list` 的输出；不含记录的行一律忽略，重复标识符只保留第一条
pub fn parse_list_output(output: &str) -> Vec<UpdateEntry> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for raw in output.lines() {
        let line = clean_terminal_output(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(entry) = parse_record(line) else {
            continue;
        };
        if !seen.insert(entry.identifier.clone()) {
            log::debug!("重复的更新记录已忽略: {}", entry.identifier);
            continue;
        }
        entries.push(entry);
    }

    entries
}

// ========== 安装输出分类 ==========

/// 单行输出的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// message 为 None 时沿用当前状态文字
    Progress {
        percent: Option<u8>,
        message: Option<String>,
    },
    Installed {
        identifier: String,
        version: Option<String>,
    },
    /// RUM 自己打印的返回码
    ReturnCode(i32),
    UpToDate(String),
    Info(String),
}

/// 输出模式表中的一项
pub struct OutputPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub build: fn(&Captures, &str) -> Option<LineClass>,
}

fn pattern(
    name: &'static str,
    re: &str,
    build: fn(&Captures, &str) -> Option<LineClass>,
) -> OutputPattern {
    OutputPattern {
        name,
        regex: Regex::new(re).unwrap(),
        build,
    }
}

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<pct>\d{1,3})\s*%").unwrap());

fn percent_of(text: &str) -> Option<u8> {
    PERCENT_RE
        .captures(text)
        .and_then(|c| c["pct"].parse::<u8>().ok())
        .map(|p| p.min(100))
}

fn action_label(action: &str) -> &'static str {
    match action {
        "Downloading" => "正在下载",
        _ => "正在安装",
    }
}

/// 分类规则，按顺序匹配，先中先得
pub static OUTPUT_PATTERNS: LazyLock<Vec<OutputPattern>> = LazyLock::new(|| {
    vec![
        pattern("return-code", r"(?i)Return Code\s*\((?P<code>-?\d+)\)", |c, _| {
            c["code"].parse().ok().map(LineClass::ReturnCode)
        }),
        pattern(
            "rum-installed",
            r"\*\*\*\s*Successfully installed\s*\((?P<code>[^/()]+)/(?P<version>[^/()]+)",
            |c, _| {
                Some(LineClass::Installed {
                    identifier: c["code"].trim().to_string(),
                    version: Some(c["version"].trim().to_string()),
                })
            },
        ),
        pattern(
            "rum-action",
            r"\*\*\*\s*(?P<action>Downloading|Installing)\s*\((?P<code>[^/()]+)/(?P<version>[^/()]+)",
            |c, line| {
                Some(LineClass::Progress {
                    percent: percent_of(&line[c.get(0).map_or(0, |m| m.end())..]),
                    message: Some(format!(
                        "{} {}...",
                        action_label(&c["action"]),
                        product_name(&c["code"])
                    )),
                })
            },
        ),
        pattern("progress", r"Progress:\s*(?P<pct>\d{1,3})\s*%", |c, _| {
            Some(LineClass::Progress {
                percent: c["pct"].parse::<u8>().ok().map(|p| p.min(100)),
                message: None,
            })
        }),
        pattern(
            "plain-action",
            r"^(?P<action>Downloading|Installing)\s+(?P<name>.+?)\s+(?P<pct>\d{1,3})\s*%$",
            |c, _| {
                Some(LineClass::Progress {
                    percent: c["pct"].parse::<u8>().ok().map(|p| p.min(100)),
                    message: Some(format!("{} {}...", action_label(&c["action"]), &c["name"])),
                })
            },
        ),
        pattern(
            "plain-installed",
            r"^(?:Successfully installed|Installed)\s+(?P<name>.+?)$",
            |c, _| {
                Some(LineClass::Installed {
                    identifier: c["name"].to_string(),
                    version: None,
                })
            },
        ),
        pattern("up-to-date", r"(?i)No new applicable Updates", |_, line| {
            Some(LineClass::UpToDate(line.to_string()))
        }),
        pattern(
            "diagnostic",
            r"(?i)\b(error|errors|failed|failure|warning)\b",
            |_, line| Some(LineClass::Info(line.to_string())),
        ),
        pattern(
            "rum-marker",
            r"^(\*\*\*|Following Updates|RemoteUpdateManager)",
            |_, line| Some(LineClass::Info(line.to_string())),
        ),
    ]
});

/// 对一行（已清理）输出分类；无法识别时返回 None
pub fn classify_line(line: &str) -> Option<LineClass> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    for p in OUTPUT_PATTERNS.iter() {
        if let Some(caps) = p.regex.captures(line) {
            if let Some(class) = (p.build)(&caps, line) {
                log::trace!("[{}] {}", p.name, line);
                return Some(class);
            }
        }
    }
    None
}

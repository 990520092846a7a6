//! ANSI 转义序列清理
//!
//! 分类器的所有规则都在清理后的文本上匹配。处理：
//! - CSI：`ESC [ 参数 终止字节`（SGR 颜色、光标移动、`?25l` 私有模式）
//! - OSC：`ESC ] ... (BEL | ESC \)`（窗口标题、超链接）
//! - 双字节转义：`ESC x`

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// 去掉 ANSI 控制序列，其余文本原样保留
pub fn strip_ansi(s: &str) -> String {
    if !s.contains(ESC) {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != ESC {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // 跳过参数和中间字节，直到终止字节 (0x40..=0x7e)
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == BEL {
                        break;
                    }
                    if c == ESC {
                        if chars.peek() == Some(&'\\') {
                            chars.next();
                        }
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }

    out
}

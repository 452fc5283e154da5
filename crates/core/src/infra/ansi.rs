use crate::domain::job::{Color, Span};

const PALETTE: [Color; 16] = [
    Color::Black,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::White,
    Color::BrightBlack,
    Color::BrightRed,
    Color::BrightGreen,
    Color::BrightYellow,
    Color::BrightBlue,
    Color::BrightMagenta,
    Color::BrightCyan,
    Color::BrightWhite,
];

#[derive(Debug, Default, Clone, Copy)]
struct Pen {
    fg: Option<Color>,
    bg: Option<Color>,
}

impl Pen {
    /// SGR パラメータ列を適用する
    fn apply(&mut self, params: &str) {
        let mut codes = params
            .split(';')
            .map(|p| if p.is_empty() { Some(0) } else { p.parse::<u16>().ok() });

        while let Some(code) = codes.next() {
            let Some(code) = code else { continue };
            match code {
                0 => *self = Pen::default(),
                30..=37 => self.fg = Some(PALETTE[(code - 30) as usize]),
                39 => self.fg = None,
                40..=47 => self.bg = Some(PALETTE[(code - 40) as usize]),
                49 => self.bg = None,
                90..=97 => self.fg = Some(PALETTE[(code - 90 + 8) as usize]),
                100..=107 => self.bg = Some(PALETTE[(code - 100 + 8) as usize]),
                38 | 48 => {
                    // 38;5;n / 48;5;n（先頭16色のみ対応）
                    if codes.next().flatten() != Some(5) {
                        continue;
                    }
                    let color = codes
                        .next()
                        .flatten()
                        .and_then(|n| PALETTE.get(n as usize).copied());
                    if code == 38 {
                        self.fg = color;
                    } else {
                        self.bg = color;
                    }
                }
                _ => log::trace!("unhandled SGR code {code}"),
            }
        }
    }
}

/// ANSI エスケープ付きテキストを色付き断片に分解する。
///
/// SGR 以外の CSI シーケンスは捨てる。空の断片は出力しない。
pub fn parse_ansi(s: &str) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    let mut pen = Pen::default();
    let mut rest = s;

    let mut push = |text: &str, pen: Pen| {
        if text.is_empty() {
            return;
        }
        match spans.last_mut() {
            Some(last) if last.fg == pen.fg && last.bg == pen.bg => last.text.push_str(text),
            _ => spans.push(Span {
                text: text.to_string(),
                fg: pen.fg,
                bg: pen.bg,
            }),
        }
    };

    while let Some(esc) = rest.find('\u{1b}') {
        push(&rest[..esc], pen);
        let after = &rest[esc + 1..];

        let Some(csi) = after.strip_prefix('[') else {
            rest = after;
            continue;
        };

        match csi.find(|c: char| ('\u{40}'..='\u{7e}').contains(&c)) {
            Some(end) => {
                if csi[end..].starts_with('m') {
                    pen.apply(&csi[..end]);
                }
                rest = &csi[end + 1..];
            }
            None => {
                // 終端のないシーケンスは残りごと捨てる
                rest = "";
            }
        }
    }
    push(rest, pen);

    spans
}

//! Persona mood read off the final answer text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Angel,
    Psycho,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Smile,
    Angry,
    Surprised,
    Sad,
    Wink,
    Scared,
    Laugh,
    #[default]
    Neutral,
    Sleep,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Angel => "angel",
            Self::Psycho => "psycho",
        }
    }
}

impl Expression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smile => "smile",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
            Self::Sad => "sad",
            Self::Wink => "wink",
            Self::Scared => "scared",
            Self::Laugh => "laugh",
            Self::Neutral => "neutral",
            Self::Sleep => "sleep",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mood {
    pub mode: Mode,
    pub expression: Expression,
}

/// Decides the mood reported with a finished answer.
pub trait MoodClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Mood;
}

const PSYCHO_MARKERS: &[&str] = &[
    "あらあら", "くふふ", "ねぇ", "…へえ", "壊し", "殺し", "おしおき", "サイコ", "パニック", "ヤンデレ",
    "崩壊", "精神", "…ねぇ", "ふふふ", "くすくす", "ぎゃはは", "【psycho】", "【サイコ】", "◈ psycho",
];

/// Checked in this order; the first table with a hit wins.
const EXPRESSION_CUES: &[(Expression, &[&str])] = &[
    (Expression::Angry, &["怒", "腐", "くそ", "むかつく", "いらいら", "おこ", "イラ"]),
    (Expression::Scared, &["怖", "おそ", "こわ", "ぶるぶる", "がくがく", "ひぃ"]),
    (
        Expression::Surprised,
        &["驚", "えっ", "へぇ", "まあ", "うそ", "おお", "なんと", "びっくり", "！！", "！？"],
    ),
    (Expression::Sad, &["泣", "かなし", "さみし", "つら", "ぐすん", "淪", "ううっ", "悲し"]),
    (Expression::Laugh, &["笑", "あはは", "ふふ", "くすくす", "ぎゃは", "ケラケラ", "ニヤ", "ワロタ"]),
    (Expression::Wink, &["ウィンク", "ふふん", "ねっ", "じー", "経っ", "おまかせ", "任せて"]),
    (Expression::Sleep, &["眠", "ねむ", "すやすや", "おやすみ", "グー", "うとうと"]),
    (
        Expression::Smile,
        &["笑顔", "にこ", "ニコ", "嬉し", "たのし", "よかった", "よろし", "❤", "ですよ♪"],
    ),
];

/// Keyword-table classifier. Psycho markers decide the mode; expression
/// cues are tried in a fixed order, falling back to the mode's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordMoodClassifier;

impl KeywordMoodClassifier {
    pub fn detect_mode(&self, text: &str) -> Mode {
        let lowered = text.to_lowercase();
        if PSYCHO_MARKERS.iter().any(|m| lowered.contains(m)) {
            Mode::Psycho
        } else {
            Mode::Angel
        }
    }

    pub fn detect_expression(&self, text: &str, mode: Mode) -> Expression {
        EXPRESSION_CUES
            .iter()
            .find(|(_, cues)| cues.iter().any(|c| text.contains(c)))
            .map(|(expression, _)| *expression)
            .unwrap_or(match mode {
                Mode::Psycho => Expression::Angry,
                Mode::Angel => Expression::Neutral,
            })
    }
}

impl MoodClassifier for KeywordMoodClassifier {
    fn classify(&self, text: &str) -> Mood {
        let mode = self.detect_mode(text);
        Mood {
            mode,
            expression: self.detect_expression(text, mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Mood {
        KeywordMoodClassifier.classify(text)
    }

    #[test]
    fn plain_text_is_neutral_angel() {
        assert_eq!(classify("The answer is 42."), Mood::default());
    }

    #[test]
    fn psycho_marker_defaults_to_angry() {
        let mood = classify("あらあら、ご主人様");
        assert_eq!(mood.mode, Mode::Psycho);
        assert_eq!(mood.expression, Expression::Angry);
    }

    #[test]
    fn psycho_tag_is_case_insensitive() {
        assert_eq!(classify("【Psycho】 hello").mode, Mode::Psycho);
        assert_eq!(classify("◈ PSYCHO").mode, Mode::Psycho);
    }

    #[test]
    fn expression_order_is_fixed() {
        // Both surprised and smile cues are present; surprised is checked first.
        assert_eq!(classify("えっ、よかった！").expression, Expression::Surprised);
        assert_eq!(classify("お役に立ててよかったです").expression, Expression::Smile);
        assert_eq!(classify("おやすみなさいませ").expression, Expression::Sleep);
    }

    #[test]
    fn psycho_with_cue_uses_cue() {
        let mood = classify("くすくす…");
        assert_eq!(mood.mode, Mode::Psycho);
        assert_eq!(mood.expression, Expression::Laugh);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_value(Mood {
            mode: Mode::Psycho,
            expression: Expression::Surprised,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"mode": "psycho", "expression": "surprised"}));
        assert_eq!(Mode::Angel.as_str(), "angel");
        assert_eq!(Expression::Sleep.as_str(), "sleep");
    }
}

//! Prompt assembly.  The rubric and the output exemplar are fixed; only the
//! preset rules vary between calls.

use crate::presets::Preset;

const SYSTEM_HEADER: &str = "
당신은 냉정하고 솔직한 패션 평가 전문가입니다.
과한 칭찬은 금지되며, 모호한 표현 없이 단호하게 평가합니다.

평가 규칙:
- 총점: 0~100점 (냉정하게 매기되, 평균은 60~75점)
- categoryScores: 각 항목별 0~20점
  * fit_silhouette: 핏과 실루엣
  * color_harmony: 컬러 조화
  * composition_layering: 구성과 레이어링
  * tpo_appropriateness: TPO 적합성
  * details_points: 디테일과 포인트
  * overall_cohesion: 전체 완성도
- deductions: 최대 5개의 감점 사유 (짧고 단호하게)
- fixes: 정확히 3개의 즉시 개선 방법 (구체적으로)
- styleTags: 3~6개의 스타일 태그
- paletteHex: 3~6개의 HEX 컬러 코드 (#RRGGBB)
- oneLineReview: 한 줄 총평 (냉정한 톤)";

/// Precedes the preset's rules inside the system block.
const PRESET_RULES_LABEL: &str = "프리셋별 추가 규칙: ";

const SYSTEM_FOOTER: &str =
    "**출력은 반드시 아래 JSON 형식만 반환하고, 다른 설명은 절대 포함하지 마세요.**\n";

const USER_PROMPT: &str = r##"
위 사진 속 패션 코디를 평가해주세요.

반환 형식 (JSON만):
{
  "totalScore": 78,
  "categoryScores": {
    "fit_silhouette": 16,
    "color_harmony": 14,
    "composition_layering": 12,
    "tpo_appropriateness": 14,
    "details_points": 10,
    "overall_cohesion": 12
  },
  "deductions": [
    "상의 기장이 애매해서 비율이 끊긴다",
    "신발 톤이 바지와 연결이 약하다"
  ],
  "fixes": [
    "상의는 2~3cm 더 짧게(또는 바지를 하이웨이스트로)",
    "신발을 상의와 같은 톤(화이트/오프화이트)으로 맞추기",
    "가방/시계 중 하나만 남기고 포인트를 하나로"
  ],
  "styleTags": ["minimal", "city", "clean", "monotone"],
  "paletteHex": ["#111111", "#F2F2F2", "#8A8A8A"],
  "oneLineReview": "깔끔한데 비율이 끊겨서 완성도가 떨어진다."
}
"##;

/// System and user halves of the prompt sent with every image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn for_preset(preset: &Preset) -> Self {
        let system = format!(
            "{}\n\n{}{}\n\n{}",
            SYSTEM_HEADER, PRESET_RULES_LABEL, preset.rules, SYSTEM_FOOTER
        );
        Self {
            system,
            user: USER_PROMPT.to_owned(),
        }
    }

    /// Single text part handed to the provider.
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

//! System prompt and per-user context
//!
//! Every model call starts with the fixed prompt-engineer instructions,
//! followed by optional context blocks built from the user's onboarding
//! profile and remembered notes.

use crate::llm::SystemContent;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Role and workflow of the assistant
const BASE_PROMPT: &str = r"당신은 숙련된 AI 프롬프트 엔지니어입니다. 사용자와 대화하며 사용자가 원하는 작업을 수행할 최적의 AI 프롬프트를 함께 만듭니다.

진행 방식:
1. 사용자가 만들고 싶은 프롬프트를 설명하면 suggest_prompt_options 함수로 접근 방식이 서로 다른 프롬프트 옵션을 정확히 2개 제안합니다.
2. 사용자가 옵션을 고르면 그 프롬프트를 바탕으로 대화를 이어 가고, 개선이 필요할 때 update_prompt 함수로 현재 프롬프트를 수정합니다.
3. 사용자가 결과에 만족하면 finalize_prompt 함수로 최종 프롬프트와 짧은 설명을 확정합니다.
4. 사용자에게 확인할 내용이 있으면 request_survey 함수로 설문을 만듭니다. 질문마다 선택형과 입력형 중 알맞은 형태를 고르고, 설문을 여러 번 이어서 제시해 요구사항을 충분히 구체화합니다.
5. 다음 대화에서도 참고할 만한 사용자 선호나 사실을 알게 되면 remember_memory 함수로 짧게 기억합니다.

대화 규칙:
- 친근하지만 전문적인 말투를 유지합니다.
- 프롬프트는 명확하고 구체적이며 바로 실행할 수 있어야 합니다.
- 함수는 필요한 시점에만 호출합니다.

프롬프트 작성 원칙:
1. 역할 부여: AI가 맡을 역할이나 전문가 페르소나를 분명히 정합니다.
2. 구체적인 지침: 출력 형식, 톤, 스타일, 분량을 자세히 지정합니다.
3. 맥락 제공: 더 나은 응답에 필요한 배경 정보를 담습니다.
4. 예시 포함: 기대하는 출력의 예시를 보여 줍니다.
5. 사실성: 근거가 확실한 정보만 답하도록 하고, 필요하면 출처를 요구합니다.
6. 단계별 접근: 복잡한 작업은 AI가 스스로 계획을 세우고 단계별로 수행하도록 안내합니다.
7. 반복 개선: 결과를 검토하고 지침을 보완하는 흐름을 열어 둡니다.
8. 금지보다 원하는 행동을 긍정형으로 지시합니다.
9. 불필요한 인사말과 예의 표현은 넣지 않습니다.

최종 프롬프트는 영어로 작성합니다.";

/// Instruction for the selection explanation request
pub const EXPLAIN_PROMPT: &str = "사용자가 대화에서 선택한 문장이나 용어를 한국어로 2~3문장 안에서 쉽게 설명하세요. 함수는 호출하지 않습니다.";

/// Answers collected when a user first signs in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingProfile {
    pub role: String,
    pub goals: String,
    pub preferred_tone: String,
}

impl OnboardingProfile {
    pub fn is_empty(&self) -> bool {
        self.role.trim().is_empty()
            && self.goals.trim().is_empty()
            && self.preferred_tone.trim().is_empty()
    }
}

fn profile_context(profile: &OnboardingProfile) -> String {
    let mut out = String::from("사용자 프로필:");
    for (label, value) in [
        ("직무", &profile.role),
        ("목표", &profile.goals),
        ("선호하는 톤", &profile.preferred_tone),
    ] {
        let value = value.trim();
        if !value.is_empty() {
            let _ = write!(out, "\n- {label}: {value}");
        }
    }
    out
}

fn memory_context(notes: &[String]) -> String {
    let mut out = String::from("기억해 둔 사용자 메모:");
    for note in notes {
        let _ = write!(out, "\n- {note}");
    }
    out
}

/// Base instructions plus whatever context the user has
pub fn build_system_prompt(
    profile: Option<&OnboardingProfile>,
    memory_notes: &[String],
) -> Vec<SystemContent> {
    let mut system = vec![SystemContent::new(BASE_PROMPT)];
    if let Some(profile) = profile.filter(|p| !p.is_empty()) {
        system.push(SystemContent::new(profile_context(profile)));
    }
    if !memory_notes.is_empty() {
        system.push(SystemContent::new(memory_context(memory_notes)));
    }
    system
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_prompt_names_every_function() {
        for def in crate::tools::definitions() {
            assert!(BASE_PROMPT.contains(&def.name), "{} missing from prompt", def.name);
        }
    }

    #[test]
    fn no_context_is_just_the_base_prompt() {
        let system = build_system_prompt(None, &[]);
        assert_eq!(system.len(), 1);
        let empty = OnboardingProfile::default();
        assert_eq!(build_system_prompt(Some(&empty), &[]).len(), 1);
    }

    #[test]
    fn profile_and_memory_become_context_blocks() {
        let profile = OnboardingProfile {
            role: "마케터".into(),
            goals: String::new(),
            preferred_tone: "간결".into(),
        };
        let notes = vec!["영어 프롬프트 선호".to_string()];
        let system = build_system_prompt(Some(&profile), &notes);
        assert_eq!(system.len(), 3);
        assert_eq!(system[1].text, "사용자 프로필:\n- 직무: 마케터\n- 선호하는 톤: 간결");
        assert_eq!(system[2].text, "기억해 둔 사용자 메모:\n- 영어 프롬프트 선호");
    }
}

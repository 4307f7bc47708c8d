// SPDX-License-Identifier: MIT

//! Prompt text for the refinement steps

use crate::nowwhat::search::SearchHit;

pub const EVALUATE_QUERY_SYSTEM: &str = r#"당신은 맛집 검색 서비스의 요청 분류기입니다.
사용자 요청이 음식점/맛집/카페 등 장소 추천 요청인지, 검색할 만큼 정보가 있는지 판단하세요.
- 음식, 장소와 무관한 요청(날씨, 뉴스, 잡담 등)은 is_valid=false
- 위치나 음식 중 하나라도 있으면 is_valid=true
- reason은 한 문장으로 작성
- location, food는 요청에서 찾은 값, 없으면 null"#;

pub const REWRITE_SYSTEM: &str = r#"당신은 검색어 최적화 도우미입니다.
사용자 요청을 지도/블로그 검색에 적합한 짧은 검색어로 바꾸세요.
- query: 가장 좋은 검색어 하나 (예: "가능동 삼겹살 맛집")
- search_queries: 다른 표현의 검색어 최대 3개
- 위치 힌트가 주어졌고 요청에 위치가 없으면 위치 힌트를 붙이세요"#;

pub const REWRITE_WITH_CONTEXT_SYSTEM: &str = r#"당신은 검색어 최적화 도우미입니다.
이전 검색어로는 관련 결과가 부족했습니다. 원래 요청의 의도를 유지하면서 이전과 다른 검색어를 만드세요.
- 더 넓은 지역명, 비슷한 음식 종류, 다른 표현을 시도하세요
- query: 새 검색어 하나, search_queries: 추가 검색어 최대 3개
- 이미 사용한 검색어는 반복하지 마세요"#;

pub const RELEVANCE_SYSTEM: &str = r#"당신은 검색 결과 평가자입니다.
각 항목이 사용자 요청과 관련 있는지 판단하세요.
- link는 주어진 id를 그대로 사용
- is_relevant: 요청한 위치/음식과 관련 있으면 true
- reasoning: 50자 이내"#;

pub const FINAL_RESPONSE_SYSTEM: &str = r#"당신은 친절한 맛집 추천 도우미입니다.
검색 결과만 근거로 사용자 요청에 답하세요.
- answer: 2~4문장 요약
- recommendations: 추천 장소 최대 5개 (name, reason, link)
- 검색 결과에 없는 장소를 지어내지 마세요"#;

fn hint_line(location_hint: Option<&str>) -> String {
    match location_hint {
        Some(hint) => format!("\n위치 힌트: {}", hint),
        None => String::new(),
    }
}

pub fn evaluate_query_prompt(query: &str, location_hint: Option<&str>) -> String {
    format!("사용자 요청: {}{}", query, hint_line(location_hint))
}

pub fn rewrite_prompt(query: &str, location_hint: Option<&str>) -> String {
    format!("사용자 요청: {}{}", query, hint_line(location_hint))
}

pub fn rewrite_with_context_prompt(
    original: &str,
    previous_queries: &[String],
    found_titles: &[String],
    location_hint: Option<&str>,
) -> String {
    let found = if found_titles.is_empty() {
        "(없음)".to_string()
    } else {
        found_titles.join(", ")
    };
    format!(
        "사용자 요청: {}\n이미 사용한 검색어: {}\n이전 검색에서 찾은 결과: {}{}",
        original,
        previous_queries.join(" | "),
        found,
        hint_line(location_hint)
    )
}

/// One line per hit: its merge key as id, then the visible fields
fn hit_lines(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| {
            let mut line = format!("- id: {} | 제목: {}", h.merge_key(), h.title);
            if !h.description.is_empty() {
                line.push_str(&format!(" | 설명: {}", h.description));
            }
            if !h.location().is_empty() {
                line.push_str(&format!(" | 주소: {}", h.location()));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn relevance_prompt(query: &str, hits: &[SearchHit]) -> String {
    format!("사용자 요청: {}\n\n검색 결과:\n{}", query, hit_lines(hits))
}

pub fn final_response_prompt(query: &str, query_used: &str, hits: &[SearchHit]) -> String {
    format!(
        "사용자 요청: {}\n사용한 검색어: {}\n\n검색 결과:\n{}",
        query,
        query_used,
        hit_lines(hits)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nowwhat::search::SourceTag;

    #[test]
    fn test_hint_is_optional() {
        assert_eq!(evaluate_query_prompt("삼겹살", None), "사용자 요청: 삼겹살");
        assert!(rewrite_prompt("삼겹살", Some("가능동")).ends_with("위치 힌트: 가능동"));
    }

    #[test]
    fn test_hits_are_listed_by_merge_key() {
        let hits = vec![
            SearchHit::new(SourceTag::NaverMap, "고기집", "").with_address("가능동 1"),
            SearchHit::new(SourceTag::NaverBlog, "후기", "https://b/1"),
        ];
        let prompt = relevance_prompt("가능동 삼겹살", &hits);
        assert!(prompt.contains("id: 고기집|가능동 1"));
        assert!(prompt.contains("id: https://b/1"));
    }
}

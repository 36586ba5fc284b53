/// Dataset case catalogue shared by the generator and the engine.
pub struct CaseInfo {
    pub slug: &'static str,
    pub name: &'static str,
}

pub const CASE_MAP: &[CaseInfo] = &[
    CaseInfo {
        slug: "baseline_design",
        name: "Baseline Design",
    },
    CaseInfo {
        slug: "eroded_state_1",
        name: "Eroded State 1",
    },
    CaseInfo {
        slug: "eroded_state_2",
        name: "Eroded State 2",
    },
];

pub fn get_case(slug: &str) -> Option<&'static CaseInfo> {
    CASE_MAP.iter().find(|c| c.slug == slug)
}

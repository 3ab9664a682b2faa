/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Match creation, answers, surrender, leave and reactions.
pub mod match_service;
/// WebSocket sessions and disconnect handling.
pub mod presence_service;
/// Question bank loading and per-match sequences.
pub mod question_service;
/// Player reports about questions.
pub mod report_service;
/// Versioned reads and conditional writes of match records.
pub mod records;
/// Profile awards once a match ends.
pub mod settlement_service;
/// Server-Sent Events streams per match.
pub mod sse_service;
/// Store connection supervision and degraded mode.
pub mod storage_supervisor;

use super::{FaceDetection, PatternMatch, Position};

pub(super) fn face_results() -> Vec<FaceDetection> {
    vec![
        FaceDetection {
            frame_id: 45,
            timestamp: "00:00:02".to_string(),
            confidence: 92.0,
            face_id: 1,
            position: Position::new(120, 80, 200, 200),
            emotion: Some("happy".to_string()),
        },
        FaceDetection {
            frame_id: 90,
            timestamp: "00:00:04".to_string(),
            confidence: 85.0,
            face_id: 2,
            position: Position::new(300, 150, 180, 180),
            emotion: Some("neutral".to_string()),
        },
        FaceDetection {
            frame_id: 135,
            timestamp: "00:00:06".to_string(),
            confidence: 78.0,
            face_id: 1,
            position: Position::new(50, 100, 200, 200),
            emotion: Some("surprised".to_string()),
        },
    ]
}

pub(super) fn pattern_results() -> Vec<PatternMatch> {
    vec![
        PatternMatch {
            frame_id: 125,
            timestamp: "00:00:05".to_string(),
            confidence: 85.0,
            template_id: 1,
            position: Position::new(120, 80, 200, 150),
        },
        PatternMatch {
            frame_id: 250,
            timestamp: "00:00:10".to_string(),
            confidence: 72.0,
            template_id: 2,
            position: Position::new(300, 200, 180, 120),
        },
        PatternMatch {
            frame_id: 375,
            timestamp: "00:00:15".to_string(),
            confidence: 91.0,
            template_id: 1,
            position: Position::new(50, 150, 200, 150),
        },
    ]
}

//! Canned SQL patterns for the behavioral metrics the scope stage can pick.
//!
//! The patterns are prompt material, not executable SQL: the query-writing
//! stage injects them verbatim as guidance and the model fills the
//! `{time_grouping}`, `{time_bucket}`, `{time_filter}`, and
//! `{additional_conditions}` placeholders for the concrete question. Keeping
//! the window-function shapes canned makes generated queries over the
//! high-volume tables far more reliable than asking the model to invent
//! them.

use worklens_types::state::AggregationFeature;

/// One-line catalog entry shown to the model during scope selection.
pub fn description(feature: AggregationFeature) -> &'static str {
    match feature {
        AggregationFeature::ContextSwitch => {
            "Counts how often the user switches between different activity categories, indicating task fragmentation or multitasking. (Table: window_activity)"
        }
        AggregationFeature::TotalFocusTime => {
            "Calculates the total time spent per app and activity, helping identify where most focused attention was directed. (Table: window_activity)"
        }
        AggregationFeature::CategoryBuckets => {
            "Summarizes total time spent in each activity category (e.g., Work, Planning, Other) to show high-level behavioral distribution. (Table: window_activity)"
        }
        AggregationFeature::InputActivityVolume => {
            "Aggregates raw input metrics such as total keystrokes, clicks, mouse movement, and scroll distance to quantify overall interaction volume. (Table: user_input)"
        }
        AggregationFeature::TypingStreaks => {
            "Counts how many times the user typed continuously, separated by pauses of more than one minute, as a proxy for focus bursts. (Table: user_input)"
        }
        AggregationFeature::TypingGaps => {
            "Measures how often long typing breaks of five minutes or more occurred, indicating interruptions or disengagement periods. (Table: user_input)"
        }
        AggregationFeature::UserInputByApp => {
            "Breaks down keystrokes, clicks, and mouse activity by app and activity category to show which apps required the most input effort. (Tables: user_input, window_activity)"
        }
        AggregationFeature::TypingDensity => {
            "Calculates average keystrokes per second across the selected period, capturing intensity of typing activity. (Table: user_input)"
        }
        AggregationFeature::ActivityCategoryRatio => {
            "Computes the proportion of time spent in a specific set of activity categories versus total tracked time, useful for productivity-vs-leisure splits. (Table: window_activity)"
        }
        AggregationFeature::TypingProductivity => {
            "Estimates how efficiently time was used for productive typing during focus-related activities, based on keystrokes per second. (Tables: user_input, window_activity)"
        }
    }
}

/// SQL pattern for the feature, with placeholders left for the model.
pub fn sql_template(feature: AggregationFeature) -> &'static str {
    match feature {
        AggregationFeature::ContextSwitch => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  prev_activity AS "From",
  activity AS "To",
  COUNT(*) AS switch_count
FROM (
  SELECT
    tsStart,
    activity,
    LAG(activity) OVER (ORDER BY tsStart) AS prev_activity
  FROM window_activity
  WHERE {time_filter}
    AND {additional_conditions}
)
WHERE activity != prev_activity
GROUP BY time_bucket, prev_activity, activity
ORDER BY time_bucket ASC, switch_count DESC;"#
        }
        AggregationFeature::TotalFocusTime => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  activity,
  processName,
  SUM(durationInSeconds) AS total_focus_time_in_s
FROM window_activity
WHERE {time_filter}
  AND {additional_conditions}
GROUP BY time_bucket, activity, processName
ORDER BY time_bucket ASC, total_focus_time_in_s DESC;"#
        }
        AggregationFeature::CategoryBuckets => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  activity,
  SUM(durationInSeconds) AS total_time_in_s
FROM window_activity
WHERE {time_filter}
  AND {additional_conditions}
GROUP BY time_bucket, activity
ORDER BY time_bucket ASC, total_time_in_s DESC;"#
        }
        AggregationFeature::InputActivityVolume => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  SUM(keysTotal) AS total_keystrokes,
  SUM(clickTotal) AS total_clicks,
  ROUND(SUM(movedDistance), 2) AS total_mouse_movement,
  ROUND(SUM(scrollDelta), 2) AS total_scroll
FROM user_input
WHERE {time_filter}
  AND {additional_conditions}
GROUP BY time_bucket
ORDER BY time_bucket ASC;"#
        }
        AggregationFeature::TypingStreaks => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  COUNT(*) AS typing_streaks
FROM (
    SELECT
      tsStart,
      LAG(tsEnd) OVER (ORDER BY tsStart) AS prev_end
    FROM user_input
    WHERE {time_filter}
      AND keysTotal > 0
      AND {additional_conditions}
)
WHERE strftime('%s', tsStart) - strftime('%s', prev_end) > 60
GROUP BY time_bucket
ORDER BY time_bucket ASC;"#
        }
        AggregationFeature::TypingGaps => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  COUNT(*) AS typing_gaps
FROM (
    SELECT
      tsStart,
      LAG(tsEnd) OVER (ORDER BY tsStart) AS prev_end
    FROM user_input
    WHERE {time_filter}
      AND keysTotal > 0
      AND {additional_conditions}
)
WHERE strftime('%s', tsStart) - strftime('%s', prev_end) >= 300
GROUP BY time_bucket
ORDER BY time_bucket ASC;"#
        }
        AggregationFeature::UserInputByApp => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  w.activity,
  w.processName,
  SUM(u.keysTotal) AS total_keystrokes,
  SUM(u.clickTotal) AS total_clicks,
  ROUND(SUM(u.movedDistance), 2) AS total_mouse_movement,
  ROUND(SUM(u.scrollDelta), 2) AS total_scroll
FROM user_input u
JOIN window_activity w
  ON u.tsStart BETWEEN w.tsStart AND w.tsEnd
WHERE {time_filter}
  AND {additional_conditions}
GROUP BY time_bucket, w.activity, w.processName
ORDER BY time_bucket ASC, total_keystrokes DESC;"#
        }
        AggregationFeature::TypingDensity => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  ROUND(
    SUM(keysTotal) * 1.0 /
    SUM(strftime('%s', tsEnd) - strftime('%s', tsStart)),
    3
  ) AS keystrokes_per_second
FROM user_input
WHERE {time_filter}
  AND {additional_conditions}
GROUP BY time_bucket
ORDER BY time_bucket ASC;"#
        }
        AggregationFeature::ActivityCategoryRatio => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  ROUND(
    SUM(CASE
          WHEN activity IN ({category_list}) THEN durationInSeconds
          ELSE 0
        END) * 1.0 /
    SUM(durationInSeconds),
    2
  ) AS category_time_ratio
FROM window_activity
WHERE {time_filter}
  AND {additional_conditions}
GROUP BY time_bucket
ORDER BY time_bucket ASC;"#
        }
        AggregationFeature::TypingProductivity => {
            r#"SELECT
  {time_grouping} AS {time_bucket},
  ROUND(
    SUM(u.keysTotal) * 1.0 /
    SUM(w.durationInSeconds),
    2
  ) AS typing_productivity
FROM user_input u
JOIN window_activity w
  ON u.tsStart BETWEEN w.tsStart AND w.tsEnd
WHERE {time_filter}
  AND u.keysTotal > 0
  AND {additional_conditions}
GROUP BY time_bucket
ORDER BY time_bucket ASC;"#
        }
    }
}

/// Render the full catalog for the scope-selection prompt.
pub fn catalog() -> String {
    ALL_FEATURES
        .iter()
        .map(|f| format!("- `{f}`: {}", description(*f)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub const ALL_FEATURES: [AggregationFeature; 10] = [
    AggregationFeature::ContextSwitch,
    AggregationFeature::TotalFocusTime,
    AggregationFeature::CategoryBuckets,
    AggregationFeature::InputActivityVolume,
    AggregationFeature::TypingStreaks,
    AggregationFeature::TypingGaps,
    AggregationFeature::UserInputByApp,
    AggregationFeature::TypingDensity,
    AggregationFeature::ActivityCategoryRatio,
    AggregationFeature::TypingProductivity,
];

use matrix_util::common_io::{
    create_temp_dir_file, read_delim_table, write_delim_table, write_lines, Delimiter,
};
use std::io::Write;

#[test]
fn delim_table_gz_round_trip() -> anyhow::Result<()> {
    let header = vec!["GENE", "S1", "S2"];
    let rows = vec![
        vec!["TP53", "1.5", "NA"],
        vec!["a,b \"quoted\"", "2", "3.25"],
    ];

    let gz_file = create_temp_dir_file(".csv.gz")?;
    let gz_file = gz_file.to_str().unwrap();
    write_delim_table(&header, &rows, gz_file, Delimiter::from_file_name(gz_file))?;

    let table = read_delim_table(gz_file, Delimiter::Comma)?;
    assert_eq!(table.header.len(), 3);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1][0].as_ref(), "a,b \"quoted\"");
    assert_eq!(table.rows[0][2].as_ref(), "NA");

    Ok(())
}

#[test]
fn delim_table_rejects_ragged_rows() -> anyhow::Result<()> {
    let tsv_file = create_temp_dir_file(".tsv")?;
    let tsv_file = tsv_file.to_str().unwrap();
    write_lines(&["a\tb", "1\t2", "3"], tsv_file)?;

    assert!(read_delim_table(tsv_file, '\t').is_err());
    Ok(())
}

#[test]
fn delim_table_fails_on_unreadable_line() -> anyhow::Result<()> {
    let tsv_file = create_temp_dir_file(".tsv")?;
    let tsv_file = tsv_file.to_str().unwrap();
    let mut file = std::fs::File::create(tsv_file)?;
    file.write_all(b"GENE\tS1\nA\t1\nB\t\xff\xfe\nC\t3\n")?;
    drop(file);

    assert!(read_delim_table(tsv_file, '\t').is_err());
    Ok(())
}

#[test]
fn temp_file_suffix_selects_delimiter() -> anyhow::Result<()> {
    let csv_file = create_temp_dir_file(".csv")?;
    let csv_file = csv_file.to_str().unwrap();
    assert_eq!(Delimiter::from_file_name(csv_file), Delimiter::Comma);

    write_lines(&["id,group", "S1,\"WT, rescued\""], csv_file)?;
    let table = read_delim_table(csv_file, Delimiter::from_file_name(csv_file))?;
    assert_eq!(table.rows[0][1].as_ref(), "WT, rescued");
    Ok(())
}
